//! The driver profile form and its per-step validation.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use roadlink_core::FieldErrors;

macro_rules! key {
    ($name:literal) => {
        concat!("driverProfile.validation.", $name)
    };
}

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9+\-\s()]+$").expect("phone pattern is valid"));
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}$").expect("year pattern is valid"));
static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("decimal pattern is valid"));

pub const DRIVER_PASSWORD_MIN: usize = 8;
pub const EARLIEST_VEHICLE_YEAR: i32 = 1900;

/// On-boarding steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnboardingStep {
    Personal,
    License,
    Vehicle,
}

impl OnboardingStep {
    pub const ALL: [OnboardingStep; 3] = [
        OnboardingStep::Personal,
        OnboardingStep::License,
        OnboardingStep::Vehicle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OnboardingStep::Personal => "personal",
            OnboardingStep::License => "license",
            OnboardingStep::Vehicle => "vehicle",
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            OnboardingStep::Personal => Some(OnboardingStep::License),
            OnboardingStep::License => Some(OnboardingStep::Vehicle),
            OnboardingStep::Vehicle => None,
        }
    }

    pub fn previous(self) -> Option<Self> {
        match self {
            OnboardingStep::Personal => None,
            OnboardingStep::License => Some(OnboardingStep::Personal),
            OnboardingStep::Vehicle => Some(OnboardingStep::License),
        }
    }

    /// Form field names (as reported in [`FieldErrors`]) owned by this step.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            OnboardingStep::Personal => &[
                "firstName",
                "lastName",
                "email",
                "password",
                "confirmPassword",
                "phoneNumber",
                "dateOfBirth",
                "address",
                "city",
            ],
            OnboardingStep::License => &["licenseNumber", "licenseExpiry", "licenseClass"],
            OnboardingStep::Vehicle => &[
                "vehicleType",
                "vehicleMake",
                "vehicleModel",
                "vehicleYear",
                "vehiclePlate",
                "vehicleColor",
                "vehicleCapacity",
                "isChilled",
            ],
        }
    }

    pub fn of_field(field: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.fields().contains(&field))
    }

    /// Earliest step owning one of the failed fields.
    pub fn first_failing(errors: &FieldErrors) -> Option<Self> {
        errors.iter().filter_map(|e| Self::of_field(&e.field)).min()
    }
}

impl core::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw form input, exactly as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverProfileForm {
    // Personal
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub phone_number: String,
    pub date_of_birth: String,
    pub address: String,
    pub city: String,

    // License
    pub license_number: String,
    pub license_expiry: String,
    pub license_class: String,

    // Vehicle
    pub vehicle_type: String,
    pub vehicle_make: String,
    pub vehicle_model: String,
    pub vehicle_year: String,
    pub vehicle_plate: String,
    pub vehicle_color: String,
    pub vehicle_capacity: String,
    pub is_chilled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub date_of_birth: NaiveDate,
    pub address: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseDetails {
    pub number: String,
    pub expiry: NaiveDate,
    pub class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub make: String,
    pub model: String,
    pub year: u16,
    pub plate: String,
    pub color: String,
    /// Load capacity, as entered (non-negative).
    pub capacity: f64,
    pub is_chilled: bool,
}

/// A fully validated profile. Carries no credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub personal: PersonalDetails,
    pub license: LicenseDetails,
    pub vehicle: VehicleDetails,
}

impl DriverProfileForm {
    /// Validate the fields of a single step.
    ///
    /// `today` bounds the accepted vehicle year.
    pub fn validate_step(&self, step: OnboardingStep, today: NaiveDate) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        match step {
            OnboardingStep::Personal => {
                self.personal(&mut errors);
            }
            OnboardingStep::License => {
                self.license(&mut errors);
            }
            OnboardingStep::Vehicle => {
                self.vehicle(&mut errors, today);
            }
        }
        errors.into_result()
    }

    /// Validate every step and produce the typed profile.
    pub fn validate(&self, today: NaiveDate) -> Result<DriverProfile, FieldErrors> {
        let mut errors = FieldErrors::new();
        let personal = self.personal(&mut errors);
        let license = self.license(&mut errors);
        let vehicle = self.vehicle(&mut errors, today);

        match (personal, license, vehicle) {
            (Some(personal), Some(license), Some(vehicle)) if errors.is_empty() => Ok(DriverProfile {
                personal,
                license,
                vehicle,
            }),
            _ => Err(errors),
        }
    }

    // Each step helper returns `None` exactly when it reported an error.

    fn personal(&self, errors: &mut FieldErrors) -> Option<PersonalDetails> {
        let before = errors.len();

        errors
            .field("firstName", &self.first_name)
            .min_chars(2, key!("firstNameMin"))
            .max_chars(50, key!("firstNameMax"));
        errors
            .field("lastName", &self.last_name)
            .min_chars(2, key!("lastNameMin"))
            .max_chars(50, key!("lastNameMax"));
        errors
            .field("email", &self.email)
            .required(key!("emailRequired"))
            .email(key!("emailInvalid"));
        errors
            .field("password", &self.password)
            .required(key!("passwordRequired"))
            .min_chars(DRIVER_PASSWORD_MIN, key!("passwordMin"));

        let confirm = errors
            .field("confirmPassword", &self.confirm_password)
            .required(key!("confirmPasswordRequired"));
        if !confirm.failed() && self.password != self.confirm_password {
            errors.push("confirmPassword", key!("passwordsDontMatch"));
        }

        errors
            .field("phoneNumber", &self.phone_number)
            .min_chars(10, key!("phoneNumberMin"))
            .matches(&PHONE, key!("phoneNumberInvalid"));
        errors
            .field("dateOfBirth", &self.date_of_birth)
            .required(key!("dateOfBirthRequired"))
            .check(|v| iso_date(v).is_some(), key!("dateOfBirthInvalid"));
        errors
            .field("address", &self.address)
            .min_chars(5, key!("addressMin"))
            .max_chars(200, key!("addressMax"));
        errors
            .field("city", &self.city)
            .min_chars(2, key!("cityRequired"));

        if errors.len() > before {
            return None;
        }
        Some(PersonalDetails {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            date_of_birth: iso_date(&self.date_of_birth)?,
            address: self.address.clone(),
            city: self.city.clone(),
        })
    }

    fn license(&self, errors: &mut FieldErrors) -> Option<LicenseDetails> {
        let before = errors.len();

        errors
            .field("licenseNumber", &self.license_number)
            .min_chars(5, key!("licenseNumberMin"))
            .max_chars(20, key!("licenseNumberMax"));
        errors
            .field("licenseExpiry", &self.license_expiry)
            .required(key!("licenseExpiryRequired"))
            .check(|v| iso_date(v).is_some(), key!("licenseExpiryInvalid"));
        errors
            .field("licenseClass", &self.license_class)
            .required(key!("licenseClassRequired"));

        if errors.len() > before {
            return None;
        }
        Some(LicenseDetails {
            number: self.license_number.clone(),
            expiry: iso_date(&self.license_expiry)?,
            class: self.license_class.clone(),
        })
    }

    fn vehicle(&self, errors: &mut FieldErrors, today: NaiveDate) -> Option<VehicleDetails> {
        let before = errors.len();
        let latest_year = today.year() + 1;

        errors
            .field("vehicleType", &self.vehicle_type)
            .min_chars(2, key!("vehicleTypeRequired"));
        errors
            .field("vehicleMake", &self.vehicle_make)
            .min_chars(2, key!("vehicleMakeRequired"));
        errors
            .field("vehicleModel", &self.vehicle_model)
            .min_chars(2, key!("vehicleModelRequired"));
        errors
            .field("vehicleYear", &self.vehicle_year)
            .matches(&YEAR, key!("vehicleYearInvalid"))
            .check(
                |v| {
                    v.parse::<i32>()
                        .is_ok_and(|y| (EARLIEST_VEHICLE_YEAR..=latest_year).contains(&y))
                },
                key!("vehicleYearInvalid"),
            );
        errors
            .field("vehiclePlate", &self.vehicle_plate)
            .min_chars(3, key!("vehiclePlateMin"))
            .max_chars(15, key!("vehiclePlateMax"));
        errors
            .field("vehicleColor", &self.vehicle_color)
            .min_chars(2, key!("vehicleColorRequired"));
        errors
            .field("vehicleCapacity", &self.vehicle_capacity)
            .matches(&DECIMAL, key!("vehicleCapacityInvalid"))
            .check(|v| v.parse::<f64>().is_ok_and(f64::is_finite), key!("vehicleCapacityInvalid"));

        if errors.len() > before {
            return None;
        }
        Some(VehicleDetails {
            kind: self.vehicle_type.clone(),
            make: self.vehicle_make.clone(),
            model: self.vehicle_model.clone(),
            year: self.vehicle_year.parse().ok()?,
            plate: self.vehicle_plate.clone(),
            color: self.vehicle_color.clone(),
            capacity: self.vehicle_capacity.parse().ok()?,
            is_chilled: self.is_chilled,
        })
    }
}

fn iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn complete() -> DriverProfileForm {
        DriverProfileForm {
            first_name: "Omar".into(),
            last_name: "Haddad".into(),
            email: "omar@roadlink.sy".into(),
            password: "secret-123".into(),
            confirm_password: "secret-123".into(),
            phone_number: "+963 (11) 555-0199".into(),
            date_of_birth: "1990-04-12".into(),
            address: "12 Baghdad Street".into(),
            city: "Damascus".into(),
            license_number: "DL-48213".into(),
            license_expiry: "2028-01-31".into(),
            license_class: "C".into(),
            vehicle_type: "Truck".into(),
            vehicle_make: "Volvo".into(),
            vehicle_model: "FH16".into(),
            vehicle_year: "2019".into(),
            vehicle_plate: "DAM-4471".into(),
            vehicle_color: "White".into(),
            vehicle_capacity: "18.5".into(),
            is_chilled: true,
        }
    }

    #[test]
    fn complete_form_produces_typed_profile() {
        let profile = complete().validate(today()).unwrap();
        assert_eq!(profile.personal.date_of_birth, NaiveDate::from_ymd_opt(1990, 4, 12).unwrap());
        assert_eq!(profile.license.expiry, NaiveDate::from_ymd_opt(2028, 1, 31).unwrap());
        assert_eq!(profile.vehicle.year, 2019);
        assert_eq!(profile.vehicle.capacity, 18.5);
        assert!(profile.vehicle.is_chilled);
    }

    #[test]
    fn empty_personal_step_reports_every_field_once() {
        let err = DriverProfileForm::default()
            .validate_step(OnboardingStep::Personal, today())
            .unwrap_err();

        assert_eq!(err.len(), OnboardingStep::Personal.fields().len());
        assert_eq!(err.get("firstName"), Some("driverProfile.validation.firstNameMin"));
        assert_eq!(err.get("email"), Some("driverProfile.validation.emailRequired"));
        assert_eq!(err.get("password"), Some("driverProfile.validation.passwordRequired"));
        assert_eq!(
            err.get("confirmPassword"),
            Some("driverProfile.validation.confirmPasswordRequired")
        );
        assert_eq!(err.get("dateOfBirth"), Some("driverProfile.validation.dateOfBirthRequired"));
        assert_eq!(err.get("city"), Some("driverProfile.validation.cityRequired"));
    }

    #[test]
    fn step_validation_ignores_other_steps() {
        let mut form = complete();
        form.vehicle_plate.clear();
        assert!(form.validate_step(OnboardingStep::Personal, today()).is_ok());
        assert!(form.validate_step(OnboardingStep::License, today()).is_ok());
        assert!(form.validate_step(OnboardingStep::Vehicle, today()).is_err());
    }

    #[test]
    fn password_rules() {
        let mut form = complete();
        form.password = "short".into();
        form.confirm_password = "short".into();
        let err = form.validate_step(OnboardingStep::Personal, today()).unwrap_err();
        assert_eq!(err.get("password"), Some("driverProfile.validation.passwordMin"));
        assert!(!err.has("confirmPassword"));

        form.password = "long-enough".into();
        form.confirm_password = "long-enougH".into();
        let err = form.validate_step(OnboardingStep::Personal, today()).unwrap_err();
        assert_eq!(err.get("confirmPassword"), Some("driverProfile.validation.passwordsDontMatch"));
    }

    #[test]
    fn phone_number_rules() {
        let mut form = complete();
        form.phone_number = "555-01".into();
        let err = form.validate_step(OnboardingStep::Personal, today()).unwrap_err();
        assert_eq!(err.get("phoneNumber"), Some("driverProfile.validation.phoneNumberMin"));

        form.phone_number = "0944 123 45x".into();
        let err = form.validate_step(OnboardingStep::Personal, today()).unwrap_err();
        assert_eq!(err.get("phoneNumber"), Some("driverProfile.validation.phoneNumberInvalid"));
    }

    #[test]
    fn dates_must_be_iso() {
        let mut form = complete();
        form.date_of_birth = "12/04/1990".into();
        form.license_expiry = "2028-02-30".into();
        let err = form.validate(today()).unwrap_err();
        assert_eq!(err.get("dateOfBirth"), Some("driverProfile.validation.dateOfBirthInvalid"));
        assert_eq!(err.get("licenseExpiry"), Some("driverProfile.validation.licenseExpiryInvalid"));
    }

    #[test]
    fn license_bounds() {
        let mut form = complete();
        form.license_number = "1234".into();
        form.license_class.clear();
        let err = form.validate_step(OnboardingStep::License, today()).unwrap_err();
        assert_eq!(err.get("licenseNumber"), Some("driverProfile.validation.licenseNumberMin"));
        assert_eq!(err.get("licenseClass"), Some("driverProfile.validation.licenseClassRequired"));

        form.license_number = "X".repeat(21);
        let err = form.validate_step(OnboardingStep::License, today()).unwrap_err();
        assert_eq!(err.get("licenseNumber"), Some("driverProfile.validation.licenseNumberMax"));
    }

    #[test]
    fn capacity_must_be_plain_decimal() {
        for bad in ["", "-3", "1e3", "12.", ".5", "ten"] {
            let mut form = complete();
            form.vehicle_capacity = bad.into();
            let err = form.validate_step(OnboardingStep::Vehicle, today()).unwrap_err();
            assert_eq!(
                err.get("vehicleCapacity"),
                Some("driverProfile.validation.vehicleCapacityInvalid"),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn steps_are_ordered() {
        assert_eq!(OnboardingStep::Personal.next(), Some(OnboardingStep::License));
        assert_eq!(OnboardingStep::Vehicle.next(), None);
        assert_eq!(OnboardingStep::Personal.previous(), None);
        assert_eq!(OnboardingStep::of_field("vehiclePlate"), Some(OnboardingStep::Vehicle));
        assert_eq!(OnboardingStep::of_field("nope"), None);

        let mut errors = FieldErrors::new();
        errors.push("vehicleYear", "x");
        errors.push("licenseClass", "y");
        assert_eq!(OnboardingStep::first_failing(&errors), Some(OnboardingStep::License));
    }

    #[test]
    fn form_deserializes_from_camel_case() {
        let form: DriverProfileForm = serde_json::from_value(serde_json::json!({
            "firstName": "Lina",
            "vehicleCapacity": "2",
            "isChilled": true
        }))
        .unwrap();
        assert_eq!(form.first_name, "Lina");
        assert!(form.is_chilled);
        assert!(form.last_name.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a four-digit year is accepted iff it lies between 1900
        /// and next year.
        #[test]
        fn vehicle_year_window(year in 1000i32..=9999) {
            let mut form = complete();
            form.vehicle_year = year.to_string();
            let accepted = form.validate_step(OnboardingStep::Vehicle, today()).is_ok();
            prop_assert_eq!(accepted, (1900..=2026).contains(&year));
        }
    }
}
