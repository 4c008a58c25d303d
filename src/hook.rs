//! DNS-01 hook units for certbot's manual plugin
//!
//! certbot runs the authorization unit once per validated name with
//! `CERTBOT_DOMAIN` and `CERTBOT_VALIDATION` in its environment, and the
//! cleanup unit once per name afterwards. Both run as separate processes, so
//! they are self-contained bash scripts (curl + jq) that re-implement the zone
//! walk of [`crate::dns_provider::zone_candidates`] and the relative-name rule
//! of [`crate::dns_provider::challenge_record_name`]. The two must be kept in
//! step by hand.
//!
//! Only Hetzner is supported. Authorization adds the validation value to the
//! `_acme-challenge` TXT RRset, so the apex and wildcard values of one name can
//! coexist; cleanup removes exactly that value and never fails.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::constants::{ACME_CHALLENGE_LABEL, HETZNER_API_BASE};
use crate::error::ProvisionResult;
use crate::system::SystemOps;
use crate::validation::slug;

/// Credential file and hook unit locations for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPaths {
    pub token: PathBuf,
    pub auth: PathBuf,
    pub cleanup: PathBuf,
}

/// Generates and installs the Hetzner DNS-01 hook units
pub struct ChallengeHookGenerator<'a> {
    system: &'a dyn SystemOps,
    hook_dir: PathBuf,
    api_base: String,
    propagation_delay: Duration,
    ttl: u32,
}

impl<'a> ChallengeHookGenerator<'a> {
    pub fn new(
        system: &'a dyn SystemOps,
        hook_dir: impl Into<PathBuf>,
        propagation_delay: Duration,
        ttl: u32,
    ) -> Self {
        Self {
            system,
            hook_dir: hook_dir.into(),
            api_base: HETZNER_API_BASE.to_string(),
            propagation_delay,
            ttl,
        }
    }

    /// Overrides the API base baked into the scripts
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn paths_for(&self, domain: &str) -> HookPaths {
        let safe = slug(domain);
        HookPaths {
            token: self.hook_dir.join(format!("hetzner-token-{}", safe)),
            auth: self.hook_dir.join(format!("hetzner-auth-{}.sh", safe)),
            cleanup: self.hook_dir.join(format!("hetzner-cleanup-{}.sh", safe)),
        }
    }

    /// Writes the credential file (0600) and both hook units (0700)
    ///
    /// The credential file stays in place after the run: certbot replays the
    /// recorded hooks on renewal and they read the token from it.
    pub async fn install(&self, domain: &str, token: &str) -> ProvisionResult<HookPaths> {
        let paths = self.paths_for(domain);

        self.system.create_dir_all(&self.hook_dir).await?;
        self.system
            .write_file(&paths.token, &format!("{}\n", token), 0o600)
            .await?;
        debug!(path = %paths.token.display(), "Wrote DNS-01 credential file");

        self.system
            .write_file(&paths.auth, &self.render_auth_script(&paths.token), 0o700)
            .await?;
        self.system
            .write_file(&paths.cleanup, &self.render_cleanup_script(&paths.token), 0o700)
            .await?;

        info!(
            "Installed DNS-01 hooks {} and {}",
            paths.auth.display(),
            paths.cleanup.display()
        );
        Ok(paths)
    }

    /// Authorization unit: find zone, add TXT value, wait for propagation
    ///
    /// Exits non-zero with a message on stderr when no zone matches or the API
    /// call fails, which makes certbot abort.
    pub fn render_auth_script(&self, token_path: &Path) -> String {
        format!(
            r#"{prelude}
zone_name="$(find_zone)" || {{
  echo "Could not determine Hetzner DNS zone for $fqdn" >&2
  exit 1
}}
record_name="$(record_name_for "$zone_name")"
payload="$(jq -cn --arg val "$CERTBOT_VALIDATION" --argjson ttl {ttl} \
  '{{ttl: $ttl, records: [{{value: ("\"" + $val + "\"")}}]}}')"

if ! curl -fsS -X POST \
  -H "Authorization: Bearer $token" -H "Content-Type: application/json" \
  -d "$payload" \
  "$api/zones/$zone_name/rrsets/$record_name/TXT/actions/add_records" >/dev/null; then
  echo "Failed to add TXT record $record_name in zone $zone_name" >&2
  exit 1
fi

sleep {delay}
"#,
            prelude = self.prelude(token_path, true),
            ttl = self.ttl,
            delay = self.propagation_delay.as_secs(),
        )
    }

    /// Cleanup unit: remove the TXT value added by authorization
    ///
    /// Always exits 0; an absent zone or record counts as cleaned up.
    pub fn render_cleanup_script(&self, token_path: &Path) -> String {
        format!(
            r#"{prelude}
zone_name="$(find_zone)" || exit 0
record_name="$(record_name_for "$zone_name")"
payload="$(jq -cn --arg val "$CERTBOT_VALIDATION" \
  '{{records: [{{value: ("\"" + $val + "\"")}}]}}')" || exit 0

curl -sS -X POST \
  -H "Authorization: Bearer $token" -H "Content-Type: application/json" \
  -d "$payload" \
  "$api/zones/$zone_name/rrsets/$record_name/TXT/actions/remove_records" >/dev/null 2>&1 || true

exit 0
"#,
            prelude = self.prelude(token_path, false),
        )
    }

    /// Shared header: strict mode, credential, zone walk and record naming
    fn prelude(&self, token_path: &Path, strict: bool) -> String {
        let mode = if strict { "set -euo pipefail" } else { "set -uo pipefail" };
        format!(
            r#"#!/bin/bash
# Generated by tlsfront. Invoked by certbot; do not edit.
{mode}

token="$(cat "{token_path}")"
api="{api}"
fqdn="${{CERTBOT_DOMAIN,,}}"

# Parent suffixes with at least two labels, most specific first; a two-label
# name is its own only candidate.
candidates() {{
  local rest="${{fqdn#*.}}"
  if [[ "$rest" != *.* ]]; then
    echo "$fqdn"
    return
  fi
  while [[ "$rest" == *.* ]]; do
    echo "$rest"
    rest="${{rest#*.}}"
  done
}}

find_zone() {{
  local candidate resp found
  for candidate in $(candidates); do
    resp="$(curl -fsS -H "Authorization: Bearer $token" "$api/zones?name=$candidate")" || return 1
    found="$(echo "$resp" | jq -r --arg n "$candidate" '.zones[]? | select(.name == $n) | .name' | head -n1)"
    if [ -n "$found" ]; then
      echo "$found"
      return 0
    fi
  done
  return 1
}}

record_name_for() {{
  local zone="$1"
  if [ "$fqdn" = "$zone" ]; then
    echo "{label}"
  else
    echo "{label}.${{fqdn%.$zone}}"
  fi
}}
"#,
            mode = mode,
            token_path = token_path.display(),
            api = self.api_base,
            label = ACME_CHALLENGE_LABEL,
        )
    }
}
