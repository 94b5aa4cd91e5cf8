//! devgrid-health: readiness checks for the local cluster.
//!
//! Every wait in devgrid goes through one bounded poller:
//!
//! ```text
//! poll_until_ready(policy, cancel, probe)
//!   ├── membership probe   scheduler CLI output contains "alive"
//!   ├── job-health probe   "Deployed" table row shows 1/1/0
//!   └── external probe     HTTP GET, 2xx body contains "Healthy"
//! ```
//!
//! Probe errors are tolerated until the policy's error-streak limit (if
//! any) or timeout is reached. Every poll can be cancelled through a
//! `watch` channel.

pub mod poller;
pub mod probe;
pub mod status;

pub use poller::{PollError, PollOutcome, PollPolicy, PollSummary, poll_until_ready};
pub use probe::{
    HttpProbeError, HttpProbeFuture, HttpProber, HttpResponse, HyperProber, http_outcome,
    membership_outcome,
};
pub use status::{DeploymentSummary, is_deployment_healthy, members_ready, parse_deployment_summary};
