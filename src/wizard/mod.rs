pub mod controller;
pub mod form;

pub use controller::{EnrollmentOutcome, EnrollmentWizard, WizardStage};
pub use form::{AccountSetup, Gender, PersonalDetails};
