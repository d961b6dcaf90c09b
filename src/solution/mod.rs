pub mod coordinates;
pub mod loader;
pub mod model;

pub use coordinates::Coordinates;
pub use loader::{load_solution, parse_solution, resolve_solution_file, SOLUTION_FILE_NAME};
pub use model::{
    ArgBinding, ArgumentSpec, Citation, DependencySpec, InstallationPaths, ParentSpec, Scripts,
    Solution, SolutionSetup, StepRef,
};
