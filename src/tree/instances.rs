//! The two trees the service maintains

use super::SparseMerkleTree;
use crate::hasher::Blake3FieldHash;
use crate::model::{Doctor, Prescription};

/// Tree committing to registered doctors
pub type DoctorTree<H = Blake3FieldHash> = SparseMerkleTree<Doctor, H>;

/// Tree committing to issued prescriptions and their usage state
pub type PrescriptionTree<H = Blake3FieldHash> = SparseMerkleTree<Prescription, H>;
