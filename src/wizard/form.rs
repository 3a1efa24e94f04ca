//! Form data collected by the first two wizard stages.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::error::{EnrollError, Result};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    pub fn code(self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }
}

impl FromStr for Gender {
    type Err = EnrollError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M" | "MALE" => Ok(Gender::Male),
            "F" | "FEMALE" => Ok(Gender::Female),
            other => Err(EnrollError::InvalidForm(format!("Unknown gender '{}', expected M or F", other))),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalDetails {
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub date_of_birth: NaiveDate,
    pub year_of_study: u8,
}

impl PersonalDetails {
    pub fn validate(&self) -> Result<()> {
        if self.first_name.trim().is_empty() {
            return Err(EnrollError::InvalidForm("First name is required".into()));
        }
        if self.last_name.trim().is_empty() {
            return Err(EnrollError::InvalidForm("Last name is required".into()));
        }
        if !(1..=4).contains(&self.year_of_study) {
            return Err(EnrollError::InvalidForm(format!(
                "Year of study must be between 1 and 4 (got {})", self.year_of_study
            )));
        }
        let today = Utc::now().date_naive();
        if self.date_of_birth >= today {
            return Err(EnrollError::InvalidForm("Date of birth must be in the past".into()));
        }
        if today.year() - self.date_of_birth.year() > 120 {
            return Err(EnrollError::InvalidForm("Date of birth is too far in the past".into()));
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSetup {
    pub email: String,
    pub password: String,
}

impl AccountSetup {
    pub fn validate(&self) -> Result<()> {
        let email = self.email.trim();
        let valid_email = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
            }
            None => false,
        };
        if !valid_email {
            return Err(EnrollError::InvalidForm(format!("'{}' is not a valid email address", email)));
        }

        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(EnrollError::InvalidForm(format!(
                "Password must be at least {} characters", MIN_PASSWORD_LEN
            )));
        }
        if !self.password.chars().any(|c| c.is_ascii_digit()) {
            return Err(EnrollError::InvalidForm("Password must contain a number".into()));
        }
        if !self.password.chars().any(|c| !c.is_alphanumeric()) {
            return Err(EnrollError::InvalidForm("Password must contain a special character".into()));
        }
        Ok(())
    }
}

// Keep the password out of logs.
impl fmt::Debug for AccountSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSetup")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> PersonalDetails {
        PersonalDetails {
            first_name: "Abebe".into(),
            last_name: "Kebede".into(),
            gender: Gender::Male,
            date_of_birth: NaiveDate::from_ymd_opt(2002, 5, 14).unwrap(),
            year_of_study: 2,
        }
    }

    #[test]
    fn accepts_complete_details() {
        details().validate().unwrap();
    }

    #[test]
    fn rejects_blank_names_and_bad_year() {
        let blank = PersonalDetails { first_name: "  ".into(), ..details() };
        assert!(matches!(blank.validate(), Err(EnrollError::InvalidForm(_))));

        let year = PersonalDetails { year_of_study: 5, ..details() };
        assert!(year.validate().is_err());
        let year = PersonalDetails { year_of_study: 0, ..details() };
        assert!(year.validate().is_err());
    }

    #[test]
    fn rejects_future_birth_date() {
        let future = PersonalDetails {
            date_of_birth: Utc::now().date_naive() + chrono::Duration::days(3),
            ..details()
        };
        assert!(future.validate().is_err());
    }

    #[test]
    fn gender_parses_codes_and_words() {
        assert_eq!("m".parse::<Gender>().unwrap(), Gender::Male);
        assert_eq!("Female".parse::<Gender>().unwrap(), Gender::Female);
        assert!("x".parse::<Gender>().is_err());
        assert_eq!(serde_json::to_string(&Gender::Female).unwrap(), "\"F\"");
    }

    #[test]
    fn password_rules() {
        let ok = AccountSetup { email: "a.student@uni.edu".into(), password: "s3cret!pw".into() };
        ok.validate().unwrap();

        for bad in ["short1!", "nodigits!!", "n0special"] {
            let account = AccountSetup { password: bad.into(), ..ok.clone() };
            assert!(account.validate().is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn email_shape() {
        for bad in ["plain", "@uni.edu", "me@localhost", "me@.edu"] {
            let account = AccountSetup { email: bad.into(), password: "s3cret!pw".into() };
            assert!(account.validate().is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn debug_redacts_password() {
        let account = AccountSetup { email: "a@b.co".into(), password: "s3cret!pw".into() };
        let shown = format!("{:?}", account);
        assert!(!shown.contains("s3cret"));
    }
}
