//! Service certificates issued by a Vault PKI engine, and their rotation.
//!
//! [`CertificateManager`] keeps one valid certificate for a service. A
//! background thread checks it every `check_interval` and issues a new one
//! when none is held yet or the remaining lifetime dropped to
//! `min_lifetime` or below.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vaultkit::backend::{MockVault, VaultApi};
//! use vaultkit::certificate::{CertificateManager, RotationSettings, VaultCertificateIssuer};
//! use vaultkit::naming::{EnvironmentReference, pki_mount_name};
//! use vaultkit::MountConfig;
//!
//! let service = EnvironmentReference::new("acme", "dev").service("web");
//! let vault = MockVault::new();
//! let pki = MountConfig {
//!     engine_type: "pki".to_string(),
//!     description: String::new(),
//!     options: Default::default(),
//! };
//! vault.enable_mount(&pki_mount_name(&service.environment_reference()), &pki).unwrap();
//!
//! let issuer = VaultCertificateIssuer::new(Arc::new(vault), &service);
//! let settings = RotationSettings {
//!     check_interval: Duration::from_millis(10),
//!     ..RotationSettings::default()
//! };
//! let mut manager = CertificateManager::spawn(Arc::new(issuer), settings);
//! while manager.current().is_none() {
//!     std::thread::sleep(Duration::from_millis(5));
//! }
//! manager.stop();
//! ```

use crate::backend::VaultApi;
use crate::error::{Error, Result};
use crate::naming::{ServiceReference, pki_mount_name};
use chrono::{DateTime, TimeDelta, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A certificate with its key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// PEM encoded certificate
    pub certificate: String,
    /// PEM encoded private key
    pub private_key: String,
    /// PEM encoded CA that signed the certificate
    pub issuing_ca: String,
    pub serial_number: String,
    pub expires_at: DateTime<Utc>,
}

impl Certificate {
    /// Time left until expiry; negative once expired
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> TimeDelta {
        self.expires_at - now
    }
}

/// `data` of a PKI issue reply
#[derive(Debug, Deserialize)]
pub(crate) struct IssueResponse {
    certificate: String,
    private_key: String,
    issuing_ca: String,
    serial_number: String,
    /// Unix seconds
    expiration: i64,
}

impl IssueResponse {
    pub(crate) fn into_certificate(self) -> Result<Certificate> {
        let expires_at = DateTime::from_timestamp(self.expiration, 0).ok_or_else(|| {
            Error::InvalidResponse(format!("expiration {} out of range", self.expiration))
        })?;

        Ok(Certificate {
            certificate: self.certificate,
            private_key: self.private_key,
            issuing_ca: self.issuing_ca,
            serial_number: self.serial_number,
            expires_at,
        })
    }
}

/// Source of fresh certificates
pub trait CertificateIssuer: Send + Sync {
    fn issue(&self) -> Result<Certificate>;
}

/// Issues certificates for one service from its environment's PKI mount
pub struct VaultCertificateIssuer {
    vault: Arc<dyn VaultApi>,
    pki_mount: String,
    common_name: String,
}

impl VaultCertificateIssuer {
    /// The PKI role is named like the mount
    pub fn new(vault: Arc<dyn VaultApi>, service: &ServiceReference) -> Self {
        Self {
            vault,
            pki_mount: pki_mount_name(&service.environment_reference()),
            common_name: service.service.clone(),
        }
    }
}

impl CertificateIssuer for VaultCertificateIssuer {
    fn issue(&self) -> Result<Certificate> {
        info!("issuing certificate for '{}'", self.common_name);
        self.vault
            .issue_certificate(&self.pki_mount, &self.pki_mount, &self.common_name)
    }
}

/// When and how often certificates are renewed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSettings {
    /// Renew once the remaining lifetime is at or below this
    pub min_lifetime: TimeDelta,
    pub check_interval: Duration,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            min_lifetime: TimeDelta::hours(2),
            check_interval: Duration::from_secs(5),
        }
    }
}

/// Whether `current` has to be replaced at `now`
pub fn needs_renewal(current: Option<&Certificate>, min_lifetime: TimeDelta, now: DateTime<Utc>) -> bool {
    current.is_none_or(|c| c.remaining_lifetime(now) <= min_lifetime)
}

type SharedCertificate = Arc<RwLock<Option<Certificate>>>;

/// One rotation check
fn rotate(issuer: &dyn CertificateIssuer, current: &SharedCertificate, min_lifetime: TimeDelta) {
    let now = Utc::now();
    let renew = {
        let guard = current.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            None => info!("no active certificate found"),
            Some(c) if needs_renewal(Some(c), min_lifetime, now) => info!(
                "certificate has less than {} hours left",
                min_lifetime.num_hours()
            ),
            Some(c) => info!(
                "certificate still has {} hours left",
                c.remaining_lifetime(now).num_hours()
            ),
        }
        needs_renewal(guard.as_ref(), min_lifetime, now)
    };

    if !renew {
        return;
    }

    match issuer.issue() {
        Ok(certificate) => {
            info!(
                "issued certificate '{}' valid until {}",
                certificate.serial_number, certificate.expires_at
            );
            *current.write().unwrap_or_else(PoisonError::into_inner) = Some(certificate);
        }
        // keep the old certificate until the next tick
        Err(e) if e.is_retryable() => warn!("failed to issue certificate, retrying on next check: {e}"),
        Err(e) => warn!("failed to issue certificate ({}): {e}", e.category().advice()),
    }
}

/// Handle of the background rotation thread
///
/// Dropping the handle stops the thread.
pub struct CertificateManager {
    current: SharedCertificate,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CertificateManager {
    /// Start rotating certificates from `issuer`
    ///
    /// The first check runs immediately.
    pub fn spawn(issuer: Arc<dyn CertificateIssuer>, settings: RotationSettings) -> Self {
        let current: SharedCertificate = Arc::new(RwLock::new(None));
        let (stop, stopped) = mpsc::channel::<()>();

        let shared = current.clone();
        let handle = thread::spawn(move || {
            loop {
                rotate(issuer.as_ref(), &shared, settings.min_lifetime);

                match stopped.recv_timeout(settings.check_interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("certificate rotation stopped");
        });

        Self {
            current,
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// The certificate currently held, if any
    pub fn current(&self) -> Option<Certificate> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the rotation thread and wait for it to finish
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("certificate rotation thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for CertificateManager {
    fn drop(&mut self) {
        self.stop();
    }
}
