mod walk;

pub use walk::enumerate;
