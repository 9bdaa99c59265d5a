//! Domain plausibility checks for candidate pairs.
//!
//! Every check is fail-open: if a date or age it needs cannot be parsed, the pair is
//! viable. Sparse historical data must not disappear from candidate generation.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::model::{BirthField, DeathField, MarriageField, Record, RecordKind, RecordPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViabilityConfig {
    pub max_age_at_death: i64,
    pub max_allowable_age_discrepancy: i64,
    pub min_age_at_marriage: i64,
    pub max_allowable_marriage_age_discrepancy: i64,
    pub min_parent_age_at_birth: i64,
    pub max_parent_age_at_birth: i64,
    /// Unset means siblings are not constrained by age.
    pub max_sibling_age_diff: Option<i64>,
}

impl Default for ViabilityConfig {
    fn default() -> Self {
        Self {
            max_age_at_death: 110,
            max_allowable_age_discrepancy: 4,
            min_age_at_marriage: 14,
            max_allowable_marriage_age_discrepancy: 4,
            min_parent_age_at_birth: 15,
            max_parent_age_at_birth: 50,
            max_sibling_age_diff: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Spouse {
    Bride,
    Groom,
}

/// The person a record is about, for sibling comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonRole {
    Baby,
    Deceased,
    Bride,
    Groom,
}

impl PersonRole {
    pub fn kind(self) -> RecordKind {
        match self {
            PersonRole::Baby => RecordKind::Birth,
            PersonRole::Deceased => RecordKind::Death,
            PersonRole::Bride | PersonRole::Groom => RecordKind::Marriage,
        }
    }
}

/// Which plausibility check a linkage applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViabilityRule {
    Always,
    /// Birth record and the same person's death record.
    BirthDeathIdentity,
    /// Birth record and the same person's marriage, as bride or groom.
    BirthMarriageIdentity(Spouse),
    /// Death record and the same person's earlier marriage.
    DeathMarriageIdentity,
    /// First record: parent's birth. Second record: child's birth.
    BirthParentIdentity,
    Sibling(PersonRole, PersonRole),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViabilityFilter {
    rule: ViabilityRule,
    config: ViabilityConfig,
}

impl ViabilityFilter {
    pub fn new(rule: ViabilityRule, config: ViabilityConfig) -> Self {
        Self { rule, config }
    }

    pub fn rule(&self) -> ViabilityRule {
        self.rule
    }

    pub fn is_viable(&self, pair: &RecordPair<'_>) -> bool {
        let c = &self.config;
        let verdict = match self.rule {
            ViabilityRule::Always => Some(true),
            ViabilityRule::BirthDeathIdentity => {
                let (birth, death) = pair.oriented(RecordKind::Birth);
                birth_death_identity(c, birth, death)
            }
            ViabilityRule::BirthMarriageIdentity(spouse) => {
                let (marriage, birth) = pair.oriented(RecordKind::Marriage);
                marriage_birth_identity(c, marriage, birth, spouse)
            }
            ViabilityRule::DeathMarriageIdentity => {
                let (death, marriage) = pair.oriented(RecordKind::Death);
                death_marriage_identity(death, marriage)
            }
            ViabilityRule::BirthParentIdentity => {
                birth_parent_identity(c, pair.record1(), pair.record2())
            }
            ViabilityRule::Sibling(first, second) => {
                let (r1, r2) = pair.oriented(first.kind());
                sibling(c, r1, first, r2, second)
            }
        };
        verdict.unwrap_or(true)
    }
}

// --- RULES ---
// Each returns None when a required value does not parse.

fn birth_death_identity(c: &ViabilityConfig, birth: &Record, death: &Record) -> Option<bool> {
    let born = birth_date(birth)?;
    let born_per_death_record = parse_date(death.get(DeathField::DateOfBirth))?;
    let died = date_from_parts(
        death.get(DeathField::DeathDay),
        death.get(DeathField::DeathMonth),
        death.get(DeathField::DeathYear),
    )?;
    let recorded_age = int(death.get(DeathField::AgeAtDeath))?;

    let age_from_both = whole_years(born, died);
    let age_from_death_record = whole_years(born_per_death_record, died);

    Some(
        age_from_both >= 0
            && age_from_both <= c.max_age_at_death
            && (recorded_age - age_from_both).abs() <= c.max_allowable_age_discrepancy
            && (recorded_age - age_from_death_record).abs() <= c.max_allowable_age_discrepancy,
    )
}

fn marriage_birth_identity(
    c: &ViabilityConfig,
    marriage: &Record,
    birth: &Record,
    spouse: Spouse,
) -> Option<bool> {
    let role = match spouse {
        Spouse::Bride => PersonRole::Bride,
        Spouse::Groom => PersonRole::Groom,
    };
    let birth_year_per_marriage = birth_year_of(marriage, role)?;
    let married = date_from_parts(
        marriage.get(MarriageField::MarriageDay),
        marriage.get(MarriageField::MarriageMonth),
        marriage.get(MarriageField::MarriageYear),
    )?;
    let born = birth_date(birth)?;

    let age_calculated = whole_years(born, married);
    let age_recorded = married.year() as i64 - birth_year_per_marriage;

    Some(
        age_calculated >= c.min_age_at_marriage
            && age_calculated <= c.max_age_at_death
            && (age_calculated - age_recorded).abs() <= c.max_allowable_marriage_age_discrepancy,
    )
}

fn death_marriage_identity(death: &Record, marriage: &Record) -> Option<bool> {
    let died = int(death.get(DeathField::DeathYear))?;
    let married = int(marriage.get(MarriageField::MarriageYear))?;
    Some(died >= married)
}

fn birth_parent_identity(c: &ViabilityConfig, parent: &Record, child: &Record) -> Option<bool> {
    let parent_born = int(parent.get(BirthField::BirthYear))?;
    let child_born = int(child.get(BirthField::BirthYear))?;
    let age = child_born - parent_born;
    Some(age >= c.min_parent_age_at_birth && age <= c.max_parent_age_at_birth)
}

fn sibling(
    c: &ViabilityConfig,
    r1: &Record,
    role1: PersonRole,
    r2: &Record,
    role2: PersonRole,
) -> Option<bool> {
    let Some(limit) = c.max_sibling_age_diff else {
        return Some(true);
    };
    let y1 = birth_year_of(r1, role1)?;
    let y2 = birth_year_of(r2, role2)?;
    Some((y1 - y2).abs() <= limit)
}

// --- FIELD HELPERS ---

/// Birth year of the person the record is about, directly or derived from an age.
pub fn birth_year_of(record: &Record, role: PersonRole) -> Option<i64> {
    match role {
        PersonRole::Baby => int(record.get(BirthField::BirthYear)),
        PersonRole::Deceased => {
            let derived = int(record.get(DeathField::DeathYear))
                .zip(int(record.get(DeathField::AgeAtDeath)))
                .map(|(year, age)| year - age);
            derived.or_else(|| extract_year(record.get(DeathField::DateOfBirth)))
        }
        PersonRole::Bride | PersonRole::Groom => {
            let age_or_dob = record.get(if role == PersonRole::Bride {
                MarriageField::BrideAgeOrDateOfBirth
            } else {
                MarriageField::GroomAgeOrDateOfBirth
            });
            match int(age_or_dob) {
                Some(age) => Some(int(record.get(MarriageField::MarriageYear))? - age),
                // Probably a date of birth rather than an age.
                None => extract_year(age_or_dob),
            }
        }
    }
}

fn int(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}

fn birth_date(birth: &Record) -> Option<NaiveDate> {
    date_from_parts(
        birth.get(BirthField::BirthDay),
        birth.get(BirthField::BirthMonth),
        birth.get(BirthField::BirthYear),
    )
}

fn date_from_parts(day: &str, month: &str, year: &str) -> Option<NaiveDate> {
    let day = u32::try_from(int(day)?).ok()?;
    let month = u32::try_from(int(month)?).ok()?;
    let year = i32::try_from(int(year)?).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

const DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%d.%m.%Y", "%Y-%m-%d", "%d-%m-%Y"];

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Year of a free-text date: a parsed date, else a trailing four-digit year.
pub fn extract_year(value: &str) -> Option<i64> {
    if let Some(date) = parse_date(value) {
        return Some(date.year() as i64);
    }
    let value = value.trim();
    let tail = value.get(value.len().checked_sub(4)?..)?;
    if tail.chars().all(|c| c.is_ascii_digit()) {
        tail.parse().ok()
    } else {
        None
    }
}

/// Completed years from `from` to `to`; negative when `to` is earlier.
pub fn whole_years(from: NaiveDate, to: NaiveDate) -> i64 {
    if to < from {
        return -whole_years(to, from);
    }
    let mut years = (to.year() - from.year()) as i64;
    if (to.month(), to.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    years
}

#[cfg(test)]
mod tests {
    use super::*;

    fn birth(day: &str, month: &str, year: &str) -> Record {
        Record::birth([
            (BirthField::BirthDay, day),
            (BirthField::BirthMonth, month),
            (BirthField::BirthYear, year),
        ])
    }

    fn death(day: &str, month: &str, year: &str, age: &str, dob: &str) -> Record {
        Record::death([
            (DeathField::DeathDay, day),
            (DeathField::DeathMonth, month),
            (DeathField::DeathYear, year),
            (DeathField::AgeAtDeath, age),
            (DeathField::DateOfBirth, dob),
        ])
    }

    fn filter(rule: ViabilityRule) -> ViabilityFilter {
        ViabilityFilter::new(rule, ViabilityConfig::default())
    }

    #[test]
    fn whole_years_counts_completed_years() {
        let d = |y, m, dd| NaiveDate::from_ymd_opt(y, m, dd).unwrap();
        assert_eq!(whole_years(d(1850, 6, 1), d(1900, 5, 31)), 49);
        assert_eq!(whole_years(d(1850, 6, 1), d(1900, 6, 1)), 50);
        assert_eq!(whole_years(d(1900, 6, 1), d(1850, 6, 1)), -50);
    }

    #[test]
    fn birth_death_consistent_ages_are_viable() {
        let b = birth("12", "3", "1850");
        let d = death("1", "6", "1920", "70", "12/03/1850");
        let pair = RecordPair::new(&b, &d, 0.0);
        assert!(filter(ViabilityRule::BirthDeathIdentity).is_viable(&pair));
        // orientation does not matter
        let flipped = RecordPair::new(&d, &b, 0.0);
        assert!(filter(ViabilityRule::BirthDeathIdentity).is_viable(&flipped));
    }

    #[test]
    fn birth_death_impossible_ages_are_rejected() {
        let f = filter(ViabilityRule::BirthDeathIdentity);
        let b = birth("12", "3", "1850");
        let before_birth = death("1", "6", "1840", "0", "12/03/1850");
        let too_old = death("1", "6", "1990", "140", "12/03/1850");
        let wrong_age = death("1", "6", "1920", "50", "12/03/1850");
        assert!(!f.is_viable(&RecordPair::new(&b, &before_birth, 0.0)));
        assert!(!f.is_viable(&RecordPair::new(&b, &too_old, 0.0)));
        assert!(!f.is_viable(&RecordPair::new(&b, &wrong_age, 0.0)));
    }

    #[test]
    fn non_numeric_age_at_death_is_viable_whatever_else() {
        let f = filter(ViabilityRule::BirthDeathIdentity);
        let b = birth("12", "3", "1850");
        // death year before birth, but the age cannot be read
        let d = death("1", "6", "1700", "about seventy", "12/03/1850");
        assert!(f.is_viable(&RecordPair::new(&b, &d, 0.0)));
        let blank = death("", "", "", "", "");
        assert!(f.is_viable(&RecordPair::new(&b, &blank, 0.0)));
    }

    #[test]
    fn death_after_marriage() {
        let f = filter(ViabilityRule::DeathMarriageIdentity);
        let d = death("1", "1", "1900", "60", "");
        let m_before = Record::marriage([(MarriageField::MarriageYear, "1870")]);
        let m_after = Record::marriage([(MarriageField::MarriageYear, "1910")]);
        let m_unknown = Record::marriage([(MarriageField::MarriageYear, "18??")]);
        assert!(f.is_viable(&RecordPair::new(&d, &m_before, 0.0)));
        assert!(!f.is_viable(&RecordPair::new(&m_after, &d, 0.0)));
        assert!(f.is_viable(&RecordPair::new(&d, &m_unknown, 0.0)));
    }

    #[test]
    fn parent_age_window() {
        let f = filter(ViabilityRule::BirthParentIdentity);
        let parent = birth("1", "1", "1850");
        let child_ok = birth("1", "1", "1880");
        let child_too_soon = birth("1", "1", "1860");
        let child_too_late = birth("1", "1", "1910");
        assert!(f.is_viable(&RecordPair::new(&parent, &child_ok, 0.0)));
        assert!(!f.is_viable(&RecordPair::new(&parent, &child_too_soon, 0.0)));
        assert!(!f.is_viable(&RecordPair::new(&parent, &child_too_late, 0.0)));
    }

    #[test]
    fn bride_age_checks() {
        let f = filter(ViabilityRule::BirthMarriageIdentity(Spouse::Bride));
        let b = birth("5", "5", "1860");
        let by_age = Record::marriage([
            (MarriageField::MarriageDay, "10"),
            (MarriageField::MarriageMonth, "7"),
            (MarriageField::MarriageYear, "1882"),
            (MarriageField::BrideAgeOrDateOfBirth, "22"),
        ]);
        let by_dob = Record::marriage([
            (MarriageField::MarriageDay, "10"),
            (MarriageField::MarriageMonth, "7"),
            (MarriageField::MarriageYear, "1882"),
            (MarriageField::BrideAgeOrDateOfBirth, "05/05/1860"),
        ]);
        let child_bride = Record::marriage([
            (MarriageField::MarriageDay, "10"),
            (MarriageField::MarriageMonth, "7"),
            (MarriageField::MarriageYear, "1870"),
            (MarriageField::BrideAgeOrDateOfBirth, "10"),
        ]);
        assert!(f.is_viable(&RecordPair::new(&by_age, &b, 0.0)));
        assert!(f.is_viable(&RecordPair::new(&b, &by_dob, 0.0)));
        assert!(!f.is_viable(&RecordPair::new(&child_bride, &b, 0.0)));
    }

    #[test]
    fn sibling_gap_only_when_configured() {
        let a = birth("1", "1", "1850");
        let far = Record::death([(DeathField::DeathYear, "1900"), (DeathField::AgeAtDeath, "20")]);
        let pair = RecordPair::new(&a, &far, 0.0);
        let rule = ViabilityRule::Sibling(PersonRole::Baby, PersonRole::Deceased);

        assert!(ViabilityFilter::new(rule, ViabilityConfig::default()).is_viable(&pair));

        let limited = ViabilityConfig { max_sibling_age_diff: Some(20), ..Default::default() };
        assert!(!ViabilityFilter::new(rule, limited).is_viable(&pair));

        let wide = ViabilityConfig { max_sibling_age_diff: Some(30), ..Default::default() };
        assert!(ViabilityFilter::new(rule, wide).is_viable(&pair));
    }

    #[test]
    fn derived_birth_years() {
        let groom = Record::marriage([
            (MarriageField::MarriageYear, "1880"),
            (MarriageField::GroomAgeOrDateOfBirth, "25"),
        ]);
        assert_eq!(birth_year_of(&groom, PersonRole::Groom), Some(1855));
        let dob_only = Record::death([(DeathField::DateOfBirth, "1851-02-03")]);
        assert_eq!(birth_year_of(&dob_only, PersonRole::Deceased), Some(1851));
        assert_eq!(extract_year("c. 1849"), Some(1849));
        assert_eq!(extract_year("unknown"), None);
    }
}
