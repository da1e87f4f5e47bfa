pub mod results;
pub mod samples;
pub mod text;
