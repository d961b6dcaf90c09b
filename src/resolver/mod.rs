pub mod reference;
pub mod resolver;

pub use reference::{parse_reference, SolutionRef};
pub use resolver::{environment_name, ResolveResult, Resolver};

pub(crate) use resolver::copy_dir_all;
