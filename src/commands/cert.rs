use crate::Context;
use crate::commands::{connect, load_manifest, with_advice};
use crate::ui;
use anyhow::{Context as _, Result, bail};
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::thread;
use vaultkit::naming::pki_mount_name;
use vaultkit::{Certificate, CertificateIssuer, CertificateManager, VaultCertificateIssuer};

/// Issue one certificate and print its details
pub fn issue(ctx: &Context, service: &str) -> Result<()> {
    let manifest = load_manifest(ctx)?;
    let section = manifest.certificates()?;
    let vault = connect(ctx, &manifest)?;

    let reference = section.service(service);
    let issuer = VaultCertificateIssuer::new(vault, &reference);
    let certificate = issuer
        .issue()
        .map_err(with_advice)
        .with_context(|| format!("Could not issue certificate for {reference}"))?;

    ui::header(&format!("Certificate: {service}"));
    ui::kv("PKI mount", &pki_mount_name(&reference.environment_reference()));
    print_certificate(&certificate);
    Ok(())
}

/// Keep a certificate fresh until the process is interrupted
pub fn watch(ctx: &Context, service: &str) -> Result<()> {
    let manifest = load_manifest(ctx)?;
    let section = manifest.certificates()?;
    let vault = connect(ctx, &manifest)?;

    let reference = section.service(service);
    let settings = section.rotation_settings();
    let issuer: Arc<dyn CertificateIssuer> = Arc::new(VaultCertificateIssuer::new(vault, &reference));

    ui::info(&format!(
        "Watching certificate for {reference} (renew below {}, check every {}s)",
        format_lifetime(settings.min_lifetime),
        settings.check_interval.as_secs()
    ));

    let manager = CertificateManager::spawn(issuer, settings);
    let mut serial: Option<String> = None;

    loop {
        thread::sleep(settings.check_interval);

        if !manager.is_running() {
            bail!("Certificate rotation stopped unexpectedly");
        }

        match manager.current() {
            Some(certificate) if track_serial(&mut serial, &certificate) => {
                ui::success(&format!("Certificate {} is current", certificate.serial_number));
                if !ctx.quiet {
                    print_certificate(&certificate);
                }
            }
            Some(_) => {}
            None => ui::warn("No certificate issued yet"),
        }
    }
}

/// Remember `certificate`'s serial, returning true if it differs from the last one
fn track_serial(last: &mut Option<String>, certificate: &Certificate) -> bool {
    if last.as_deref() == Some(certificate.serial_number.as_str()) {
        return false;
    }
    *last = Some(certificate.serial_number.clone());
    true
}

fn print_certificate(certificate: &Certificate) {
    ui::kv("Serial", &certificate.serial_number);
    ui::kv("Expires", &certificate.expires_at.to_rfc3339());
    ui::kv(
        "Remaining",
        &format_lifetime(certificate.remaining_lifetime(Utc::now())),
    );
}

fn format_lifetime(lifetime: TimeDelta) -> String {
    if lifetime <= TimeDelta::zero() {
        return "expired".to_string();
    }
    let hours = lifetime.num_hours();
    let minutes = lifetime.num_minutes() % 60;
    format!("{hours}h {minutes}m")
}
