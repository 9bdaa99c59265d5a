use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LinkageError, Result};
use crate::evaluation::GroundTruth;
use crate::model::{BirthField, DeathField, Field, FieldMapping, MarriageField, RecordKind};
use crate::viability::{PersonRole, Spouse, ViabilityConfig, ViabilityRule};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub kind: RecordKind,
    pub role: String,
}

impl RoleSpec {
    pub fn new(kind: RecordKind, role: &str) -> Self {
        Self { kind, role: role.to_string() }
    }
}

fn default_viability() -> ViabilityRule {
    ViabilityRule::Always
}

/// Everything one linkage needs apart from the records and the metric.
///
/// Treated as an immutable value: `with_threshold` and `with_required_fields` return a
/// new recipe for the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkageRecipe {
    pub link_type: String,
    pub role1: RoleSpec,
    pub role2: RoleSpec,
    pub fields1: Vec<Field>,
    pub fields2: Vec<Field>,
    pub threshold: f64,
    #[serde(default)]
    pub required_fields: usize,
    #[serde(default)]
    pub symmetric: bool,
    #[serde(default = "default_viability")]
    pub viability: ViabilityRule,
    #[serde(default)]
    pub viability_config: ViabilityConfig,
    #[serde(default)]
    pub ground_truth: Option<GroundTruth>,
}

impl LinkageRecipe {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let recipe: LinkageRecipe = serde_json::from_str(&text)?;
        recipe.validate()?;
        Ok(recipe)
    }

    pub fn validate(&self) -> Result<()> {
        let mapping = self.mapping()?;
        if mapping.left_kind() != self.role1.kind || mapping.right_kind() != self.role2.kind {
            return Err(LinkageError::Config(format!(
                "{}: field kinds {:?}/{:?} do not match roles {:?}/{:?}",
                self.link_type,
                mapping.left_kind(),
                mapping.right_kind(),
                self.role1.kind,
                self.role2.kind
            )));
        }
        if self.symmetric && self.role1.kind != self.role2.kind {
            return Err(LinkageError::Config(format!(
                "{}: a symmetric linkage needs one record kind on both sides",
                self.link_type
            )));
        }
        if !self.threshold.is_finite() {
            return Err(LinkageError::Config(format!("{}: threshold must be finite", self.link_type)));
        }
        if let Some(gt) = &self.ground_truth {
            gt.validate(self.role1.kind, self.role2.kind)?;
        }
        Ok(())
    }

    pub fn mapping(&self) -> Result<FieldMapping> {
        FieldMapping::new(self.fields1.clone(), self.fields2.clone())
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_required_fields(mut self, required: usize) -> Self {
        self.required_fields = required;
        self
    }

    // --- STOCK RECIPES ---

    pub fn birth_death_identity() -> Self {
        let fields1 = births(&[
            BirthField::Forename,
            BirthField::Surname,
            BirthField::MotherForename,
            BirthField::MotherMaidenSurname,
            BirthField::FatherForename,
            BirthField::FatherSurname,
        ]);
        let fields2 = deaths(&[
            DeathField::Forename,
            DeathField::Surname,
            DeathField::MotherForename,
            DeathField::MotherMaidenSurname,
            DeathField::FatherForename,
            DeathField::FatherSurname,
        ]);
        Self {
            link_type: "BIRTH_DEATH_IDENTITY".into(),
            role1: RoleSpec::new(RecordKind::Birth, "baby"),
            role2: RoleSpec::new(RecordKind::Death, "deceased"),
            fields1,
            fields2,
            threshold: 0.49,
            required_fields: 0,
            symmetric: false,
            viability: ViabilityRule::BirthDeathIdentity,
            viability_config: ViabilityConfig::default(),
            ground_truth: Some(field_equality(vec![
                vec![pair(BirthField::ChildIdentity, DeathField::DeceasedIdentity)],
                vec![pair(BirthField::StandardisedId, DeathField::BirthRecordIdentity)],
                vec![pair(BirthField::DeathRecordIdentity, DeathField::StandardisedId)],
            ], vec![])),
        }
    }

    pub fn birth_birth_sibling() -> Self {
        let fields = births(&[
            BirthField::FatherForename,
            BirthField::FatherSurname,
            BirthField::MotherForename,
            BirthField::MotherMaidenSurname,
            BirthField::ParentsPlaceOfMarriage,
            BirthField::ParentsDayOfMarriage,
            BirthField::ParentsMonthOfMarriage,
            BirthField::ParentsYearOfMarriage,
        ]);
        Self {
            link_type: "BIRTH_SIBLING".into(),
            role1: RoleSpec::new(RecordKind::Birth, "baby"),
            role2: RoleSpec::new(RecordKind::Birth, "baby"),
            fields1: fields.clone(),
            fields2: fields,
            threshold: 0.5,
            required_fields: 0,
            symmetric: true,
            viability: ViabilityRule::Sibling(PersonRole::Baby, PersonRole::Baby),
            viability_config: ViabilityConfig::default(),
            ground_truth: Some(field_equality(
                vec![
                    vec![
                        pair(BirthField::MotherIdentity, BirthField::MotherIdentity),
                        pair(BirthField::FatherIdentity, BirthField::FatherIdentity),
                    ],
                    vec![pair(BirthField::ParentMarriageRecordIdentity, BirthField::ParentMarriageRecordIdentity)],
                ],
                vec![vec![pair(BirthField::ChildIdentity, BirthField::ChildIdentity)]],
            )),
        }
    }

    pub fn death_death_sibling() -> Self {
        let fields = deaths(&[
            DeathField::FatherForename,
            DeathField::FatherSurname,
            DeathField::MotherForename,
            DeathField::MotherMaidenSurname,
        ]);
        Self {
            link_type: "DEATH_SIBLING".into(),
            role1: RoleSpec::new(RecordKind::Death, "deceased"),
            role2: RoleSpec::new(RecordKind::Death, "deceased"),
            fields1: fields.clone(),
            fields2: fields,
            threshold: 0.5,
            required_fields: 0,
            symmetric: true,
            viability: ViabilityRule::Sibling(PersonRole::Deceased, PersonRole::Deceased),
            viability_config: ViabilityConfig::default(),
            ground_truth: Some(field_equality(
                vec![vec![
                    pair(DeathField::MotherIdentity, DeathField::MotherIdentity),
                    pair(DeathField::FatherIdentity, DeathField::FatherIdentity),
                ]],
                vec![vec![pair(DeathField::DeceasedIdentity, DeathField::DeceasedIdentity)]],
            )),
        }
    }

    pub fn birth_bride_identity() -> Self {
        Self {
            link_type: "BIRTH_BRIDE_IDENTITY".into(),
            role1: RoleSpec::new(RecordKind::Birth, "baby"),
            role2: RoleSpec::new(RecordKind::Marriage, "bride"),
            fields1: births(&[
                BirthField::Forename,
                BirthField::Surname,
                BirthField::FatherForename,
                BirthField::FatherSurname,
                BirthField::MotherForename,
                BirthField::MotherMaidenSurname,
            ]),
            fields2: marriages(&[
                MarriageField::BrideForename,
                MarriageField::BrideSurname,
                MarriageField::BrideFatherForename,
                MarriageField::BrideFatherSurname,
                MarriageField::BrideMotherForename,
                MarriageField::BrideMotherMaidenSurname,
            ]),
            threshold: 0.49,
            required_fields: 0,
            symmetric: false,
            viability: ViabilityRule::BirthMarriageIdentity(Spouse::Bride),
            viability_config: ViabilityConfig::default(),
            ground_truth: Some(field_equality(vec![
                vec![pair(BirthField::ChildIdentity, MarriageField::BrideIdentity)],
                vec![pair(BirthField::StandardisedId, MarriageField::BrideBirthRecordIdentity)],
            ], vec![])),
        }
    }

    /// Father's own birth record (role1) against his child's birth record (role2).
    pub fn birth_father_identity() -> Self {
        Self {
            link_type: "BIRTH_FATHER_IDENTITY".into(),
            role1: RoleSpec::new(RecordKind::Birth, "father"),
            role2: RoleSpec::new(RecordKind::Birth, "baby"),
            fields1: births(&[BirthField::Forename, BirthField::Surname]),
            fields2: births(&[BirthField::FatherForename, BirthField::FatherSurname]),
            threshold: 0.3,
            required_fields: 0,
            symmetric: false,
            viability: ViabilityRule::BirthParentIdentity,
            viability_config: ViabilityConfig::default(),
            ground_truth: Some(field_equality(
                vec![vec![pair(BirthField::ChildIdentity, BirthField::FatherIdentity)]],
                vec![],
            )),
        }
    }

    pub fn death_groom_identity() -> Self {
        Self {
            link_type: "DEATH_GROOM_IDENTITY".into(),
            role1: RoleSpec::new(RecordKind::Death, "deceased"),
            role2: RoleSpec::new(RecordKind::Marriage, "groom"),
            fields1: deaths(&[
                DeathField::Forename,
                DeathField::Surname,
                DeathField::FatherForename,
                DeathField::FatherSurname,
                DeathField::MotherForename,
                DeathField::MotherMaidenSurname,
            ]),
            fields2: marriages(&[
                MarriageField::GroomForename,
                MarriageField::GroomSurname,
                MarriageField::GroomFatherForename,
                MarriageField::GroomFatherSurname,
                MarriageField::GroomMotherForename,
                MarriageField::GroomMotherMaidenSurname,
            ]),
            threshold: 0.49,
            required_fields: 0,
            symmetric: false,
            viability: ViabilityRule::DeathMarriageIdentity,
            viability_config: ViabilityConfig::default(),
            ground_truth: Some(field_equality(
                vec![vec![pair(DeathField::DeceasedIdentity, MarriageField::GroomIdentity)]],
                vec![],
            )),
        }
    }

    /// Stock recipe by link type name.
    pub fn stock(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BIRTH_DEATH_IDENTITY" => Some(Self::birth_death_identity()),
            "BIRTH_SIBLING" => Some(Self::birth_birth_sibling()),
            "DEATH_SIBLING" => Some(Self::death_death_sibling()),
            "BIRTH_BRIDE_IDENTITY" => Some(Self::birth_bride_identity()),
            "BIRTH_FATHER_IDENTITY" => Some(Self::birth_father_identity()),
            "DEATH_GROOM_IDENTITY" => Some(Self::death_groom_identity()),
            _ => None,
        }
    }
}

fn births(fields: &[BirthField]) -> Vec<Field> {
    fields.iter().map(|f| Field::Birth(*f)).collect()
}

fn deaths(fields: &[DeathField]) -> Vec<Field> {
    fields.iter().map(|f| Field::Death(*f)).collect()
}

fn marriages(fields: &[MarriageField]) -> Vec<Field> {
    fields.iter().map(|f| Field::Marriage(*f)).collect()
}

fn pair(a: impl Into<Field>, b: impl Into<Field>) -> (Field, Field) {
    (a.into(), b.into())
}

fn field_equality(alternatives: Vec<Vec<(Field, Field)>>, excluded: Vec<Vec<(Field, Field)>>) -> GroundTruth {
    GroundTruth::FieldEquality { alternatives, excluded, treat_any_absent_as_unknown: false }
}
