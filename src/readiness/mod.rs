pub mod bootstrap;
pub mod controller;
pub mod recheck;
pub mod state;

pub use bootstrap::{bootstrap, BootstrapError, BootstrapOrchestrator, OutstandingDependency};
pub use controller::HealthState;
pub use recheck::RecheckLoop;
pub use state::{
    DependencySnapshot, HealthSnapshot, HealthStateMachine, OverallStatus, TransitionError,
};
