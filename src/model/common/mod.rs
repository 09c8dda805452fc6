pub mod demographic;
pub mod election;
pub mod password;
pub mod receipt;
pub mod tally;
