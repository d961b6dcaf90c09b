pub mod queue;
pub mod runner;
pub mod script;

pub use queue::{QueueBuilder, QueueEntry, ScriptAction, ScriptQueue};
pub use runner::{
    QueueRunner, ENV_ACTION, ENV_ENVIRONMENT_PATH, ENV_INSTALLATION_PATH, ENV_PACKAGE_PATH,
};
pub use script::{encode_args, parse_arguments, render_bindings};
