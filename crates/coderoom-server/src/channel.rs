//! Join validation for the session channel.

use coderoom_core::wire::{Handshake, JoinFailure};
use coderoom_core::{AuthError, Identity, IdentityVerifier, Project, ProjectId, ProjectStore};
use tracing::{debug, warn};

/// Combine the handshake frame with credentials taken from the upgrade
/// request. Fields present in the frame win.
pub fn merge_handshake(frame: Handshake, fallback: &Handshake) -> Handshake {
    Handshake {
        credential: frame.credential.or_else(|| fallback.credential.clone()),
        project_id: frame.project_id.or_else(|| fallback.project_id.clone()),
    }
}

/// Check a join attempt.
///
/// Checks run in a fixed order and stop at the first failure: project id
/// syntax, project existence, credential presence, credential verification,
/// then membership. A syntactically bad id never reaches the verifier.
pub async fn authenticate(
    store: &dyn ProjectStore,
    verifier: &dyn IdentityVerifier,
    handshake: &Handshake,
) -> Result<(Identity, Project), JoinFailure> {
    let raw_id = handshake.project_id.as_deref().unwrap_or("").trim();
    let project_id: ProjectId = raw_id.parse().map_err(|_| {
        debug!(project_id = %raw_id, "join with malformed project id");
        JoinFailure::InvalidProject
    })?;

    let project = match store.get_project(project_id).await {
        Ok(project) => project,
        Err(e) if e.is_not_found() => {
            debug!(project_id = %project_id, "join for unknown project");
            return Err(JoinFailure::InvalidProject);
        }
        Err(e) => {
            warn!(project_id = %project_id, error = %e, "failed to load project for join");
            return Err(JoinFailure::InvalidProject);
        }
    };

    let credential = handshake
        .credential
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or(JoinFailure::NoToken)?;

    let identity = verifier.verify(credential).await.map_err(|e| match e {
        AuthError::MissingCredential => JoinFailure::NoToken,
        _ => JoinFailure::AuthFailed,
    })?;

    if !project.is_member(&identity.user_id) {
        debug!(
            project_id = %project_id,
            user_id = %identity.user_id,
            "join by non-member"
        );
        return Err(JoinFailure::InvalidProject);
    }

    Ok((identity, project))
}
