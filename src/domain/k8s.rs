//! Kubernetes object helpers
//!
//! Small accessors over k8s-openapi types: quantity parsing, PVC sizes,
//! PV node affinity and claim references.

use super::types::{PvcKey, LABEL_HOSTNAME, LOCAL_PROVISIONER};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;

/// Storage resource name in requests and capacities
pub const RESOURCE_STORAGE: &str = "storage";

/// PVC phase for claims not yet bound to a volume
pub const CLAIM_PENDING: &str = "Pending";

/// PVC phase for bound claims
pub const CLAIM_BOUND: &str = "Bound";

/// Parse a Kubernetes quantity (e.g. "100Gi", "1.5G", "512Mi", "1e3") to bytes
pub fn parse_quantity(q: &Quantity) -> Result<u64> {
    parse_quantity_str(&q.0)
}

/// Parse a quantity string to bytes, rounding fractional results up
pub fn parse_quantity_str(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::QuantityParse("empty quantity".into()));
    }

    let num_end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '+' || *c == '-'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let suffix = &s[num_end..];

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::QuantityParse(format!("invalid number: {}", s)))?;
    if num < 0.0 {
        return Err(Error::QuantityParse(format!("negative quantity: {}", s)));
    }

    let multiplier: f64 = match suffix {
        "" => 1.0,
        "m" => 0.001,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "Pi" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "Ei" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        exp if exp.starts_with('e') || exp.starts_with('E') => {
            let power: i32 = exp[1..]
                .parse()
                .map_err(|_| Error::QuantityParse(format!("invalid exponent: {}", s)))?;
            10f64.powi(power)
        }
        _ => return Err(Error::QuantityParse(format!("unknown suffix: {}", s))),
    };

    let bytes = (num * multiplier).ceil();
    // 2^64 is the first value a u64 cannot hold
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(Error::QuantityParse(format!("quantity out of range: {}", s)));
    }
    Ok(bytes as u64)
}

/// Requested storage bytes of a PVC
pub fn pvc_requested_bytes(pvc: &PersistentVolumeClaim) -> Result<u64> {
    let quantity = pvc
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get(RESOURCE_STORAGE))
        .ok_or_else(|| {
            Error::MalformedRequest(format!(
                "pvc {} has no storage request",
                pvc_key(pvc)
            ))
        })?;

    parse_quantity(quantity).map_err(|e| {
        Error::MalformedRequest(format!("pvc {} storage request: {}", pvc_key(pvc), e))
    })
}

/// Capacity recorded in a bound PVC's status
pub fn pvc_status_bytes(pvc: &PersistentVolumeClaim) -> Option<u64> {
    pvc.status
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get(RESOURCE_STORAGE))
        .and_then(|q| parse_quantity(q).ok())
}

/// Namespaced key of a PVC
pub fn pvc_key(pvc: &PersistentVolumeClaim) -> PvcKey {
    PvcKey::new(pvc.namespace().unwrap_or_default(), pvc.name_any())
}

/// PVC phase, defaulting to Pending
pub fn pvc_phase(pvc: &PersistentVolumeClaim) -> &str {
    pvc.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or(CLAIM_PENDING)
}

/// Storage class name requested by a PVC
pub fn pvc_storage_class(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.spec.as_ref().and_then(|s| s.storage_class_name.as_deref())
}

/// Names of the PVCs a pod mounts, in volume order
pub fn pod_claim_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .map(|volumes| {
            volumes
                .iter()
                .filter_map(|v| v.persistent_volume_claim.as_ref())
                .map(|c| c.claim_name.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Display key of a pod
pub fn pod_key(pod: &Pod) -> String {
    format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any())
}

/// Capacity of a PV in bytes
pub fn pv_capacity_bytes(pv: &PersistentVolume) -> Result<u64> {
    let quantity = pv
        .spec
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get(RESOURCE_STORAGE))
        .ok_or_else(|| Error::MalformedEvent(format!("pv {} has no capacity", pv.name_any())))?;
    parse_quantity(quantity)
}

/// PVC the PV is bound to
pub fn pv_claim_key(pv: &PersistentVolume) -> Option<PvcKey> {
    let claim = pv.spec.as_ref()?.claim_ref.as_ref()?;
    match (&claim.namespace, &claim.name) {
        (Some(ns), Some(name)) => Some(PvcKey::new(ns.clone(), name.clone())),
        _ => None,
    }
}

/// Node a local PV is pinned to via required node affinity
pub fn pv_node_name(pv: &PersistentVolume) -> Option<String> {
    let terms = &pv
        .spec
        .as_ref()?
        .node_affinity
        .as_ref()?
        .required
        .as_ref()?
        .node_selector_terms;

    terms
        .iter()
        .filter_map(|t| t.match_expressions.as_ref())
        .flatten()
        .find(|req| req.key == LABEL_HOSTNAME && req.operator == "In")
        .and_then(|req| req.values.as_ref())
        .and_then(|values| values.first().cloned())
}

/// Whether the PV is provisioned by the local storage driver
pub fn is_local_pv(pv: &PersistentVolume) -> bool {
    pv.spec.as_ref().is_some_and(|spec| {
        spec.local.is_some()
            || spec
                .csi
                .as_ref()
                .is_some_and(|csi| csi.driver == LOCAL_PROVISIONER)
    })
}
