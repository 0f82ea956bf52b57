//! # Catalog Module
//!
//! Domain types for the textbook library: school grades, subject codes and
//! textbook rows as they flow between the store, the keyboards and the bot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::localization::t_lang;

/// Lowest school grade served by the library
pub const MIN_GRADE: u8 = 1;
/// Highest school grade served by the library
pub const MAX_GRADE: u8 = 11;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("grade must be between {MIN_GRADE} and {MAX_GRADE}, got {0}")]
    GradeOutOfRange(String),
    #[error("unknown subject code: {0}")]
    UnknownSubject(String),
}

/// School class level, always within `1..=11`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Grade(u8);

impl Grade {
    /// Every grade in ascending order
    pub fn all() -> impl Iterator<Item = Grade> {
        (MIN_GRADE..=MAX_GRADE).map(Grade)
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Human readable label, e.g. "5 класс"
    pub fn label(self, language_code: Option<&str>) -> String {
        crate::localization::t_args_lang(
            "grade-label",
            &[("grade", &self.0.to_string())],
            language_code,
        )
    }
}

impl TryFrom<u8> for Grade {
    type Error = CatalogError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (MIN_GRADE..=MAX_GRADE).contains(&value) {
            Ok(Grade(value))
        } else {
            Err(CatalogError::GradeOutOfRange(value.to_string()))
        }
    }
}

impl From<Grade> for u8 {
    fn from(grade: Grade) -> Self {
        grade.0
    }
}

impl FromStr for Grade {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u8 = s
            .trim()
            .parse()
            .map_err(|_| CatalogError::GradeOutOfRange(s.to_string()))?;
        Grade::try_from(value)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// School course taught across grades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Mathematics,
    Russian,
    Literature,
    English,
    History,
    Geography,
    Biology,
    Chemistry,
    Physics,
    Informatics,
    SocialStudies,
    Economics,
    Law,
    Art,
    Music,
    PhysicalEducation,
    Technology,
    LifeSafety,
}

impl Subject {
    /// Subjects in menu display order
    pub const ALL: [Subject; 18] = [
        Subject::Mathematics,
        Subject::Russian,
        Subject::Literature,
        Subject::English,
        Subject::History,
        Subject::Geography,
        Subject::Biology,
        Subject::Chemistry,
        Subject::Physics,
        Subject::Informatics,
        Subject::SocialStudies,
        Subject::Economics,
        Subject::Law,
        Subject::Art,
        Subject::Music,
        Subject::PhysicalEducation,
        Subject::Technology,
        Subject::LifeSafety,
    ];

    /// Stable code stored in the database and embedded in callback tokens
    pub fn code(self) -> &'static str {
        match self {
            Subject::Mathematics => "mathematics",
            Subject::Russian => "russian",
            Subject::Literature => "literature",
            Subject::English => "english",
            Subject::History => "history",
            Subject::Geography => "geography",
            Subject::Biology => "biology",
            Subject::Chemistry => "chemistry",
            Subject::Physics => "physics",
            Subject::Informatics => "informatics",
            Subject::SocialStudies => "social_studies",
            Subject::Economics => "economics",
            Subject::Law => "law",
            Subject::Art => "art",
            Subject::Music => "music",
            Subject::PhysicalEducation => "physical_education",
            Subject::Technology => "technology",
            Subject::LifeSafety => "life_safety",
        }
    }

    /// Position in the display order
    pub fn position(self) -> usize {
        Subject::ALL
            .iter()
            .position(|s| *s == self)
            .unwrap_or(Subject::ALL.len())
    }

    pub fn label(self, language_code: Option<&str>) -> String {
        t_lang(
            &format!("subject-{}", self.code().replace('_', "-")),
            language_code,
        )
    }
}

impl FromStr for Subject {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subject::ALL
            .into_iter()
            .find(|subject| subject.code() == s)
            .ok_or_else(|| CatalogError::UnknownSubject(s.to_string()))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A downloadable textbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Textbook {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub grade: Grade,
    pub subject: Subject,
    /// Name presented to the user when the document is sent
    pub file_name: String,
    /// Absolute path, or a path relative to the textbook storage root
    pub file_path: String,
    pub file_size: Option<i64>,
    pub downloads: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields required to insert a textbook
#[derive(Debug, Clone, PartialEq)]
pub struct NewTextbook {
    pub title: String,
    pub author: String,
    pub grade: Grade,
    pub subject: Subject,
    pub file_name: String,
    pub file_path: String,
    pub file_size: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_bounds() {
        assert!(Grade::try_from(0).is_err());
        assert!(Grade::try_from(12).is_err());
        assert_eq!(Grade::try_from(1).unwrap().number(), 1);
        assert_eq!(Grade::try_from(11).unwrap().number(), 11);
        assert_eq!(Grade::all().count(), 11);
    }

    #[test]
    fn test_grade_parsing() {
        assert_eq!("5".parse::<Grade>().unwrap().number(), 5);
        assert!("five".parse::<Grade>().is_err());
        assert!("-1".parse::<Grade>().is_err());
    }

    #[test]
    fn test_subject_codes_round_trip() {
        for subject in Subject::ALL {
            assert_eq!(subject.code().parse::<Subject>().unwrap(), subject);
        }
        assert!("astrology".parse::<Subject>().is_err());
    }

    #[test]
    fn test_subject_serde_uses_codes() {
        let json = serde_json::to_string(&Subject::SocialStudies).unwrap();
        assert_eq!(json, "\"social_studies\"");
        let grade: Grade = serde_json::from_str("7").unwrap();
        assert_eq!(grade.number(), 7);
        assert!(serde_json::from_str::<Grade>("42").is_err());
    }
}
