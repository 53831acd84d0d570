//! License and capability checks run before any render resources are
//! committed.

use std::fmt;

use thiserror::Error;

use crate::engine::{Licensing, RendererVariant};

/// One step of the preflight sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightCheck {
    License,
    /// Base entitlement for the named feature.
    Feature(String),
    Variant(RendererVariant),
    Expiry,
}

impl fmt::Display for PreflightCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::License => f.write_str("license"),
            Self::Feature(name) => write!(f, "feature '{name}'"),
            Self::Variant(variant) => write!(f, "renderer {variant:?}"),
            Self::Expiry => f.write_str("expiry"),
        }
    }
}

/// The first check that failed and why.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{check}: {reason}")]
pub struct PreflightFailure {
    pub check: PreflightCheck,
    pub reason: String,
}

/// How a failure is shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSurface {
    /// Report through the live display and stop the session.
    Live,
    /// Log and abort the call.
    Log,
}

/// Ordered check list; stops at the first failure.
#[derive(Debug, Clone)]
pub struct PreflightChecker {
    checks: Vec<PreflightCheck>,
}

impl PreflightChecker {
    /// License, base feature, renderer variant, expiry.
    pub fn standard(feature: impl Into<String>, variant: RendererVariant) -> Self {
        Self {
            checks: vec![
                PreflightCheck::License,
                PreflightCheck::Feature(feature.into()),
                PreflightCheck::Variant(variant),
                PreflightCheck::Expiry,
            ],
        }
    }

    pub fn checks(&self) -> &[PreflightCheck] {
        &self.checks
    }

    pub fn run(&self, licensing: &dyn Licensing) -> Result<(), PreflightFailure> {
        for check in &self.checks {
            if let Some(reason) = evaluate(check, licensing) {
                log::debug!("preflight check {check} failed: {reason}");
                return Err(PreflightFailure {
                    check: check.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

fn evaluate(check: &PreflightCheck, licensing: &dyn Licensing) -> Option<String> {
    match check {
        PreflightCheck::License => {
            (!licensing.license_valid()).then(|| "no valid license found".to_string())
        }
        PreflightCheck::Feature(name) => (!licensing.feature_entitled(name))
            .then(|| format!("license does not include '{name}'")),
        PreflightCheck::Variant(variant) => (!licensing.variant_available(*variant))
            .then(|| format!("{variant:?} renderer is not available")),
        PreflightCheck::Expiry => match licensing.days_until_expiry() {
            Some(days) if days < 0 => Some(format!("license expired {} days ago", -days)),
            _ => None,
        },
    }
}
