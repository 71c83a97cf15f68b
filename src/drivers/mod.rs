pub mod board;
pub mod mic;
