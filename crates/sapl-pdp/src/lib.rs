//! SAPL policy decision point.
//!
//! Holds the configuration register with its hot-swappable compiled
//! configurations, the dynamic decision point on top of it, decision
//! interceptors, the PIP-backed attribute broker, the standard function
//! library and the settings/tracing setup shared by every binary.

pub mod attributes;
pub mod error;
pub mod functions;
pub mod interceptor;
pub mod observability;
pub mod pdp;
pub mod register;
pub mod settings;
pub mod traced;
pub mod voter;

pub use attributes::{PipAttributeBroker, PolicyInformationPoint};
pub use error::{PdpError, Result};
pub use functions::{NativeFunction, StandardFunctionBroker};
pub use interceptor::{InterceptorChain, ReportingInterceptor, VoteInterceptor, render_report};
pub use observability::init_tracing;
pub use pdp::{DEFAULT_PDP_ID, DynamicPolicyDecisionPoint};
pub use register::{ConfigurationRegister, ConfigurationUpdate};
pub use settings::{AttributeSettings, LoggingSettings, PdpSettings, Settings};
pub use traced::{NO_CONFIGURATION, TracedDecision};
pub use voter::{CompiledPdpVoter, PdpConfiguration, Retrieval};
