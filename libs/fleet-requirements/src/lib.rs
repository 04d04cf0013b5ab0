//! # fleet-requirements
//!
//! The fleet requirements document (instance bounds per profile and the
//! SSH hosts available for provisioning) and its JSON form as stored in
//! the registry.

pub mod json;
pub mod model;

pub use json::{
    RequirementsError, RequirementsResult, auto_scale_status_from_json, auto_scale_status_to_json,
    equal, from_json, read_auto_scale_status, read_requirements, to_json, to_json_pretty,
    write_requirements,
};
pub use model::{
    AutoScaleProfileStatus, AutoScaleStatus, FleetRequirements, ProfileRequirements,
    SshConfiguration, SshHostConfiguration,
};
