//! Commercial licenses: verification, storage, selection and the controllers
//! applying them to clusters.
use jiff::Timestamp;

use crate::client::ObjectStore;

pub mod cluster;
pub mod matching;
pub mod model;
pub mod store;
pub mod trial;
pub mod verifier;

use self::{
    model::EnterpriseLicense,
    verifier::{LicenseStatus, Verifier},
};

/// Knows which key each kind of enterprise license has to be signed with.
#[derive(Clone, Debug, Default)]
pub struct LicenseChecker {
    /// Key of licenses issued by Elastic.
    pub enterprise: Option<Verifier>,

    /// Key generated when the trial of this installation started.
    pub trial: Option<Verifier>,
}

impl LicenseChecker {
    /// A checker for `enterprise` licenses and the trial recorded in
    /// `operator_namespace`, if any.
    pub async fn load<S: ObjectStore>(
        store: &S,
        operator_namespace: &str,
        enterprise: Option<Verifier>,
    ) -> store::Result<Self> {
        Ok(Self {
            enterprise,
            trial: store::trial_verifier(store, operator_namespace).await?,
        })
    }

    /// Licenses without a key to check against are invalid.
    pub fn status(&self, license: &EnterpriseLicense, now: Timestamp) -> LicenseStatus {
        let verifier = if license.is_trial() {
            self.trial.as_ref()
        } else {
            self.enterprise.as_ref()
        };
        verifier.map_or(LicenseStatus::Invalid, |verifier| {
            verifier.status(license.spec(), now)
        })
    }

    pub fn is_valid(&self, license: &EnterpriseLicense, now: Timestamp) -> bool {
        self.status(license, now) == LicenseStatus::Valid
    }
}
