pub mod agent;
pub mod expansion;
