//! devgrid-cluster: brings up a local Consul + Nomad cluster and deploys the
//! proxy, storage and registry jobs onto it.
//!
//! ```text
//! Pipeline::run
//!   ├── Bootstrapper     prerequisites → spawn agents → wait for membership
//!   ├── JobDeployer ×3   job run -detach → poll job status until healthy
//!   └── external probe   GET /healthz until the body reports healthy
//!          │
//!          ▼
//! LifecycleManager       single active-instance slot, stop with escalation
//! ```
//!
//! External effects go through the `CommandRunner`, `ProcessSpawner` and
//! `HttpProber` seams, so the whole pipeline runs against fakes in tests.

pub mod agents;
pub mod bootstrap;
pub mod deployer;
pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod pipeline;

pub use bootstrap::{Bootstrapper, check_prerequisites, missing_dependency_message};
pub use deployer::{Deployment, DeploymentResult, JobDeployer};
pub use error::{DevgridError, DevgridResult};
pub use instance::{Instance, StopReport};
pub use lifecycle::{BootstrapTicket, LifecycleManager, StopOutcome};
pub use pipeline::{PhaseObserver, Pipeline, PipelineDeps, PipelinePhase, PipelineReport};
