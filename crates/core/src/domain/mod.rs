pub mod allocation;
pub mod arm;
pub mod campaign;
pub mod context;
pub mod outcome;
