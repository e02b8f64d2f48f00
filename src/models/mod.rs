mod holiday;

pub use holiday::Holiday;
