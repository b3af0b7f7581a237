//! Encounter Directory
//!
//! The static configuration behind every virtual-patient encounter: which
//! assistant plays the patient, which assistant rates the student afterwards,
//! and the case briefing shown when the encounter is selected. The directory
//! is an ordered JSON document so that "first entry" has a stable meaning.

use crate::error::VpeError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

const BUILTIN_DIRECTORY: &str = include_str!("../data/encounters.json");

/// One selectable encounter, keyed by its human-readable label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Encounter {
    /// e.g. "Mr. Aiken (Geriatrics 15)".
    pub label: String,
    /// Assistant that plays the patient in conversation.
    pub assistant_id: String,
}

impl Encounter {
    pub fn patient_name(&self) -> &str {
        patient_name(&self.label)
    }
}

/// An assistant that rates a transcript for one patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackAssistant {
    /// Derived patient name this assistant is registered for.
    pub name: String,
    pub assistant_id: String,
}

impl FeedbackAssistant {
    /// The directory key, e.g. "Mr. Aiken Feedback".
    pub fn key(&self) -> String {
        feedback_key(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Briefing {
    pub patient: String,
    pub text: String,
}

/// A resolved encounter, ready for a session to converse with.
///
/// The feedback assistant is not part of it: that is only looked up when
/// feedback is requested, see [`EncounterDirectory::assign_feedback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientEncounter {
    pub label: String,
    pub conversation_assistant_id: String,
    pub intro_text: Option<String>,
}

impl PatientEncounter {
    pub fn patient_name(&self) -> &str {
        patient_name(&self.label)
    }
}

/// The feedback assistant picked for an encounter and whether it is a
/// substitute for a missing per-patient registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackAssignment {
    pub assistant_id: String,
    pub key: String,
    /// Set when the encounter's own feedback assistant was missing and the
    /// default was used instead.
    pub substitution_warning: Option<String>,
}

/// The ordered directory of encounters, feedback assistants and briefings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncounterDirectory {
    encounters: Vec<Encounter>,
    #[serde(default)]
    feedback_assistants: Vec<FeedbackAssistant>,
    #[serde(default)]
    briefings: Vec<Briefing>,
}

impl EncounterDirectory {
    /// Builds and validates a directory.
    pub fn new(
        encounters: Vec<Encounter>,
        feedback_assistants: Vec<FeedbackAssistant>,
        briefings: Vec<Briefing>,
    ) -> Result<Self, VpeError> {
        let directory = Self {
            encounters,
            feedback_assistants,
            briefings,
        };
        directory.validate()?;
        Ok(directory)
    }

    /// The directory shipped with the service.
    pub fn builtin() -> Result<Self, VpeError> {
        Self::from_json(BUILTIN_DIRECTORY)
    }

    pub fn from_json(json: &str) -> Result<Self, VpeError> {
        let directory: Self = serde_json::from_str(json)
            .map_err(|e| VpeError::Configuration(format!("invalid encounter directory: {e}")))?;
        directory.validate()?;
        Ok(directory)
    }

    pub fn from_path(path: &Path) -> Result<Self, VpeError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            VpeError::Configuration(format!(
                "could not read encounter directory '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), VpeError> {
        if self.encounters.is_empty() {
            return Err(VpeError::Configuration(
                "No virtual patients available. Please check your assistant configuration."
                    .to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for encounter in &self.encounters {
            if encounter.label.trim().is_empty() || encounter.assistant_id.trim().is_empty() {
                return Err(VpeError::Configuration(format!(
                    "encounter '{}' must have a label and an assistant id",
                    encounter.label
                )));
            }
            if !seen.insert(encounter.label.as_str()) {
                return Err(VpeError::Configuration(format!(
                    "duplicate encounter label '{}'",
                    encounter.label
                )));
            }
        }
        if let Some(empty) = self
            .feedback_assistants
            .iter()
            .find(|fa| fa.assistant_id.trim().is_empty())
        {
            return Err(VpeError::Configuration(format!(
                "feedback assistant '{}' has no assistant id",
                empty.key()
            )));
        }
        Ok(())
    }

    /// Encounters in directory order.
    pub fn encounters(&self) -> &[Encounter] {
        &self.encounters
    }

    pub fn feedback_assistants(&self) -> &[FeedbackAssistant] {
        &self.feedback_assistants
    }

    pub fn encounter(&self, label: &str) -> Option<&Encounter> {
        self.encounters.iter().find(|e| e.label == label)
    }

    /// Case briefing for a derived patient name.
    pub fn briefing(&self, patient: &str) -> Option<&str> {
        self.briefings
            .iter()
            .find(|b| b.patient == patient)
            .map(|b| b.text.as_str())
    }

    /// The feedback assistant registered for a derived patient name.
    pub fn feedback_assistant_for(&self, patient: &str) -> Option<&FeedbackAssistant> {
        self.feedback_assistants.iter().find(|fa| fa.name == patient)
    }

    /// Picks the feedback assistant for an encounter label, substituting the
    /// default when the patient has no registration of their own.
    pub fn assign_feedback(&self, label: &str) -> Result<FeedbackAssignment, VpeError> {
        let patient = patient_name(label);
        if let Some(assistant) = self.feedback_assistant_for(patient) {
            return Ok(FeedbackAssignment {
                assistant_id: assistant.assistant_id.clone(),
                key: assistant.key(),
                substitution_warning: None,
            });
        }

        let fallback = fallback_feedback_assistant(&self.feedback_assistants).ok_or_else(|| {
            VpeError::Configuration("No feedback assistants available.".to_string())
        })?;
        warn!(
            patient,
            fallback = %fallback.key(),
            "No feedback assistant registered for patient; substituting default"
        );
        Ok(FeedbackAssignment {
            assistant_id: fallback.assistant_id.clone(),
            key: fallback.key(),
            substitution_warning: Some(format!(
                "Feedback assistant for '{patient}' not found. Using default feedback assistant."
            )),
        })
    }

    /// Resolves a label into everything a session needs to hold the interview.
    pub fn resolve(&self, label: &str) -> Result<PatientEncounter, VpeError> {
        let encounter = self
            .encounter(label)
            .ok_or_else(|| VpeError::UnknownEncounter(label.to_string()))?;
        Ok(PatientEncounter {
            label: encounter.label.clone(),
            conversation_assistant_id: encounter.assistant_id.clone(),
            intro_text: self.briefing(encounter.patient_name()).map(str::to_string),
        })
    }
}

/// The patient's name: the label text before its first parenthesis, trimmed.
pub fn patient_name(label: &str) -> &str {
    label.split('(').next().unwrap_or(label).trim()
}

pub fn feedback_key(patient: &str) -> String {
    format!("{patient} Feedback")
}

/// The default feedback assistant: the first entry in directory order.
pub fn fallback_feedback_assistant(
    assistants: &[FeedbackAssistant],
) -> Option<&FeedbackAssistant> {
    assistants.first()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn encounter(label: &str, id: &str) -> Encounter {
        Encounter {
            label: label.to_string(),
            assistant_id: id.to_string(),
        }
    }

    fn feedback(name: &str, id: &str) -> FeedbackAssistant {
        FeedbackAssistant {
            name: name.to_string(),
            assistant_id: id.to_string(),
        }
    }

    fn small_directory() -> EncounterDirectory {
        EncounterDirectory::new(
            vec![
                encounter("Mr. Aiken (Geriatrics 15)", "asst_aiken"),
                encounter("Mr. Nobody (Surgery 01)", "asst_nobody"),
            ],
            vec![
                feedback("Mrs. Kelly", "asst_kelly_fb"),
                feedback("Mr. Aiken", "asst_aiken_fb"),
            ],
            vec![Briefing {
                patient: "Mr. Aiken".to_string(),
                text: "He massages his abdomen.".to_string(),
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_patient_name_derivation() {
        assert_eq!(patient_name("Mr. Aiken (Geriatrics 15)"), "Mr. Aiken");
        assert_eq!(patient_name("Mrs. Miller (High Value Care 04)"), "Mrs. Miller");
        assert_eq!(patient_name("  Anna Pine  "), "Anna Pine");
        assert_eq!(patient_name("A (B) (C)"), "A");
        assert_eq!(patient_name(""), "");
    }

    #[test]
    fn test_builtin_directory_loads_in_order() {
        let directory = EncounterDirectory::builtin().unwrap();
        assert_eq!(directory.encounters().len(), 12);
        assert_eq!(directory.encounters()[0].label, "Mr. Aiken (Geriatrics 15)");
        assert_eq!(
            directory.feedback_assistants()[0].key(),
            "Mr. Aiken Feedback"
        );
        for encounter in directory.encounters() {
            assert!(
                directory.feedback_assistant_for(encounter.patient_name()).is_some(),
                "missing feedback assistant for {}",
                encounter.label
            );
        }
    }

    #[test]
    fn test_builtin_briefings_are_keyed_by_patient_name() {
        let directory = EncounterDirectory::builtin().unwrap();
        let miller = directory.resolve("Mrs. Miller (High Value Care 04)").unwrap();
        assert!(miller.intro_text.unwrap().contains("teach-back"));
    }

    #[test]
    fn test_resolve_carries_assistant_and_briefing() {
        let resolved = small_directory().resolve("Mr. Aiken (Geriatrics 15)").unwrap();
        assert_eq!(resolved.conversation_assistant_id, "asst_aiken");
        assert_eq!(resolved.patient_name(), "Mr. Aiken");
        assert_eq!(resolved.intro_text.as_deref(), Some("He massages his abdomen."));
        assert!(
            small_directory()
                .resolve("Mr. Nobody (Surgery 01)")
                .unwrap()
                .intro_text
                .is_none()
        );
    }

    #[test]
    fn test_assign_feedback_uses_registered_assistant() {
        let assignment = small_directory()
            .assign_feedback("Mr. Aiken (Geriatrics 15)")
            .unwrap();
        assert_eq!(assignment.assistant_id, "asst_aiken_fb");
        assert_eq!(assignment.key, "Mr. Aiken Feedback");
        assert!(assignment.substitution_warning.is_none());
    }

    #[test]
    fn test_missing_feedback_assistant_falls_back_to_first_entry() {
        let assignment = small_directory()
            .assign_feedback("Mr. Nobody (Surgery 01)")
            .unwrap();
        assert_eq!(assignment.assistant_id, "asst_kelly_fb");
        assert_eq!(assignment.key, "Mrs. Kelly Feedback");
        let warning = assignment.substitution_warning.unwrap();
        assert!(warning.contains("'Mr. Nobody' not found"));
    }

    #[test]
    fn test_fallback_is_first_in_directory_order() {
        let assistants = vec![feedback("B", "b"), feedback("A", "a")];
        assert_eq!(fallback_feedback_assistant(&assistants).unwrap().name, "B");
        assert!(fallback_feedback_assistant(&[]).is_none());
    }

    #[test]
    fn test_no_feedback_assistants_is_a_configuration_error() {
        let directory =
            EncounterDirectory::new(vec![encounter("X (Y)", "asst_x")], vec![], vec![]).unwrap();
        assert!(directory.resolve("X (Y)").is_ok());
        let err = directory.assign_feedback("X (Y)").unwrap_err();
        assert!(matches!(err, VpeError::Configuration(_)));
    }

    #[test]
    fn test_feedback_assistants_may_be_omitted_from_file() {
        let directory = EncounterDirectory::from_json(
            r#"{"encounters": [{"label": "Ms. Test (Demo 01)", "assistant_id": "asst_t"}]}"#,
        )
        .unwrap();
        assert!(directory.feedback_assistants().is_empty());
        assert!(directory.resolve("Ms. Test (Demo 01)").is_ok());
    }

    #[test]
    fn test_unknown_encounter_is_rejected() {
        let err = small_directory().resolve("Dr. Who (Time 01)").unwrap_err();
        assert!(matches!(err, VpeError::UnknownEncounter(label) if label == "Dr. Who (Time 01)"));
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let err = EncounterDirectory::from_json(r#"{"encounters": []}"#).unwrap_err();
        assert!(matches!(err, VpeError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_labels_are_rejected() {
        let err = EncounterDirectory::new(
            vec![encounter("A (1)", "x"), encounter("A (1)", "y")],
            vec![],
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_directory_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"encounters": [{{"label": "Ms. Test (Demo 01)", "assistant_id": "asst_t"}}],
                "feedback_assistants": [{{"name": "Ms. Test", "assistant_id": "asst_t_fb"}}]}}"#
        )
        .unwrap();

        let directory = EncounterDirectory::from_path(file.path()).unwrap();
        assert_eq!(directory.encounters().len(), 1);
        assert_eq!(
            directory.assign_feedback("Ms. Test (Demo 01)").unwrap().assistant_id,
            "asst_t_fb"
        );
    }

    #[test]
    fn test_missing_file_is_a_configuration_error() {
        let err = EncounterDirectory::from_path(Path::new("/nonexistent/encounters.json"))
            .unwrap_err();
        assert!(matches!(err, VpeError::Configuration(_)));
    }
}
