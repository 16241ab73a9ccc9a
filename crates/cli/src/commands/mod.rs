pub mod assemble;
pub mod doctor;
pub mod validate;
