//! Driver on-boarding.
//!
//! A three-step form (personal details, driving license, vehicle) that is
//! validated step by step and, once complete, creates the driver's account
//! and registers the driver record with the backend.

pub mod profile;
pub mod registry;
pub mod submit;
pub mod wizard;

pub use profile::{
    DriverProfile, DriverProfileForm, LicenseDetails, OnboardingStep, PersonalDetails,
    VehicleDetails,
};
pub use registry::{DriverRecord, DriverRegistry, InMemoryDriverRegistry};
pub use submit::{DriverOnboarding, OnboardingError, Submission};
pub use wizard::Onboarding;
