pub mod region;

pub use region::{is_bed_header, Region};
