//! Client and host runtimes: folder watcher, process supervisor, directory
//! lifecycle manager, pipeline controller, module puller and git smart-HTTP
//! host.

pub mod controller;
mod error;
pub mod githost;
pub mod paths;
pub mod provisioner;
pub mod puller;
mod runtime;
pub mod supervisor;
pub mod watcher;

pub use controller::{PipelineController, PipelineState, RunOutcome};
pub use error::DaemonError;
pub use provisioner::{DirectoryManager, ManagerHandle};
pub use puller::ModulePuller;
pub use runtime::{
    init_tracing, run_client, run_client_with, run_host, run_host_with, start_client_blocking,
    start_host_blocking,
};
pub use supervisor::{run_blocking, CommandLine, ProcessState, SupervisedProcess};
pub use watcher::FolderWatcher;
