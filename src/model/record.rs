//! Business records anchored in the trees
//!
//! Each record kind gets its own tree. The fields fed to `hash_data` are the
//! authenticated value of the record; everything else is plain storage.

use super::{FieldElement, RecordId};
use crate::hasher::FieldHash;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// The two anchored record kinds, one tree each
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    Doctors,
    Prescriptions,
}

impl TreeKind {
    pub const ALL: [TreeKind; 2] = [TreeKind::Doctors, TreeKind::Prescriptions];

    pub fn as_str(&self) -> &'static str {
        match self {
            TreeKind::Doctors => "doctors",
            TreeKind::Prescriptions => "prescriptions",
        }
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TreeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "doctors" | "doctor" => Ok(TreeKind::Doctors),
            "prescriptions" | "prescription" => Ok(TreeKind::Prescriptions),
            other => Err(Error::NotFound(format!("tree '{}'", other))),
        }
    }
}

/// A record that can be stored as a leaf of a sparse Merkle tree
pub trait TreeRecord: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Which tree this record kind lives in
    const KIND: TreeKind;

    /// Integer identifier, used as the tree key
    fn id(&self) -> RecordId;

    /// Hash of the authenticated fields
    fn hash_data<H: FieldHash>(&self, hasher: &H) -> FieldElement;

    /// Record in the doctor tree whose membership must be proven alongside this one
    fn issuer(&self) -> Option<RecordId> {
        None
    }

    /// Flip the record's mutable state (the value an UPDATE anchors)
    fn set_updated(&mut self, _updated: bool) -> Result<()> {
        Err(Error::Unsupported(format!("{} records cannot be updated", Self::KIND)))
    }
}

/// Current unix time in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// A registered professional
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: RecordId,
    /// Professional license number
    pub license: u64,
    /// Owning user account
    pub user_id: u64,
}

/// Input for registering a doctor; the id is assigned by the store
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewDoctor {
    pub license: u64,
    pub user_id: u64,
}

impl NewDoctor {
    pub fn with_id(self, id: RecordId) -> Doctor {
        Doctor {
            id,
            license: self.license,
            user_id: self.user_id,
        }
    }
}

impl TreeRecord for Doctor {
    const KIND: TreeKind = TreeKind::Doctors;

    fn id(&self) -> RecordId {
        self.id
    }

    fn hash_data<H: FieldHash>(&self, hasher: &H) -> FieldElement {
        hasher.hash_fields(&[
            FieldElement::from(self.id),
            FieldElement::from(self.license),
            FieldElement::from(self.user_id),
        ])
    }
}

/// An issued prescription
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: RecordId,
    pub doctor_id: RecordId,
    pub presentation_id: u64,
    pub patient_id: u64,
    pub quantity: u64,
    /// Emission timestamp (unix millis)
    pub emitted_at: u64,
    /// Whether a pharmacist has dispensed it
    pub used: bool,
    pub used_at: Option<u64>,
    /// Kept across reverts so an undone dispensation can be redone
    pub pharmacist_id: Option<u64>,
}

/// Input for issuing a prescription; the id is assigned by the store
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewPrescription {
    pub doctor_id: RecordId,
    pub presentation_id: u64,
    pub patient_id: u64,
    pub quantity: u64,
    pub emitted_at: Option<u64>,
}

impl NewPrescription {
    pub fn with_id(self, id: RecordId) -> Prescription {
        Prescription {
            id,
            doctor_id: self.doctor_id,
            presentation_id: self.presentation_id,
            patient_id: self.patient_id,
            quantity: self.quantity,
            emitted_at: self.emitted_at.unwrap_or_else(now_millis),
            used: false,
            used_at: None,
            pharmacist_id: None,
        }
    }
}

impl Prescription {
    /// Record a dispensation by the given pharmacist
    pub fn dispense(&mut self, pharmacist_id: u64) {
        self.used = true;
        self.used_at = Some(now_millis());
        self.pharmacist_id = Some(pharmacist_id);
    }
}

impl TreeRecord for Prescription {
    const KIND: TreeKind = TreeKind::Prescriptions;

    fn id(&self) -> RecordId {
        self.id
    }

    fn hash_data<H: FieldHash>(&self, hasher: &H) -> FieldElement {
        hasher.hash_fields(&[
            FieldElement::from(self.id),
            FieldElement::from(self.doctor_id),
            FieldElement::from(self.presentation_id),
            FieldElement::from(self.patient_id),
            FieldElement::from(self.quantity),
            FieldElement::from(self.emitted_at),
            FieldElement::from(u64::from(self.used)),
        ])
    }

    fn issuer(&self) -> Option<RecordId> {
        Some(self.doctor_id)
    }

    fn set_updated(&mut self, updated: bool) -> Result<()> {
        self.used = updated;
        if updated {
            self.used_at.get_or_insert_with(now_millis);
        } else {
            self.used_at = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Blake3FieldHash;

    fn prescription() -> Prescription {
        NewPrescription {
            doctor_id: 1,
            presentation_id: 4,
            patient_id: 9,
            quantity: 2,
            emitted_at: Some(1_700_000_000_000),
        }
        .with_id(3)
    }

    #[test]
    fn test_used_flag_changes_hash() {
        let h = Blake3FieldHash;
        let mut p = prescription();
        let before = p.hash_data(&h);
        p.set_updated(true).unwrap();
        assert_ne!(before, p.hash_data(&h));
        p.set_updated(false).unwrap();
        assert_eq!(before, p.hash_data(&h));
    }

    #[test]
    fn test_pharmacist_not_authenticated() {
        let h = Blake3FieldHash;
        let mut a = prescription();
        a.set_updated(true).unwrap();
        let mut b = a.clone();
        b.pharmacist_id = Some(77);
        assert_eq!(a.hash_data(&h), b.hash_data(&h));
    }

    #[test]
    fn test_now_millis_is_wall_clock() {
        // 2020-09-13 in unix millis
        assert!(now_millis() > 1_600_000_000_000);
        assert!(now_millis() < u64::MAX);
    }

    #[test]
    fn test_doctor_cannot_be_updated() {
        let mut d = NewDoctor {
            license: 1234,
            user_id: 5,
        }
        .with_id(1);
        assert!(matches!(d.set_updated(true), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_tree_kind_parse() {
        assert_eq!("doctors".parse::<TreeKind>().unwrap(), TreeKind::Doctors);
        assert_eq!(
            "prescription".parse::<TreeKind>().unwrap(),
            TreeKind::Prescriptions
        );
        assert!("patients".parse::<TreeKind>().is_err());
    }
}
