use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("owner {0} has no uid yet")]
    MissingUid(String),
    #[error("{object} is already controlled by {kind}/{name}")]
    AlreadyOwned {
        object: String,
        kind: String,
        name: String,
    },
}

/// Identity of the object that owns (and garbage-collects) everything the
/// operator creates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerInfo {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl OwnerInfo {
    pub fn new(
        api_version: &str,
        kind: &str,
        name: &str,
        uid: Option<&str>,
    ) -> Result<Self, OwnershipError> {
        let uid = uid
            .filter(|u| !u.is_empty())
            .ok_or_else(|| OwnershipError::MissingUid(name.to_string()))?;
        Ok(Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
        })
    }

    pub fn controller_ref(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Make `owner` the controller of `meta`, keeping unrelated owner references.
///
/// Fails when another object already holds the controller reference, so an
/// object is never silently adopted away from a different owner.
pub fn set_controller_owner(
    meta: &mut ObjectMeta,
    owner: &OwnerInfo,
) -> Result<(), OwnershipError> {
    let mut refs = meta.owner_references.take().unwrap_or_default();
    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        let err = OwnershipError::AlreadyOwned {
            object: meta.name.clone().unwrap_or_default(),
            kind: other.kind.clone(),
            name: other.name.clone(),
        };
        meta.owner_references = Some(refs);
        return Err(err);
    }
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner.controller_ref());
    meta.owner_references = Some(refs);
    Ok(())
}

pub fn is_controlled_by(meta: &ObjectMeta, owner: &OwnerInfo) -> bool {
    meta.owner_references
        .as_ref()
        .map(|refs| {
            refs.iter()
                .any(|r| r.uid == owner.uid && r.controller == Some(true))
        })
        .unwrap_or(false)
}
