pub mod approval;
pub mod payment;
pub mod records;
