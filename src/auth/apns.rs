//! APNs auth material.
//!
//! Bearer profiles attach `Authorization: Bearer <token>`; key-pair
//! profiles carry their identity on the TLS transport instead. Both
//! attach `apns-topic` with the profile's bundle id on every request.

use crate::error::Error;
use crate::profile::{AppleCredentials, AppleProfile};

#[derive(Debug, Clone)]
pub struct ApnsAuth {
    bundle_id: String,
    bearer_token: Option<String>,
    identity_pem: Option<Vec<u8>>,
}

impl ApnsAuth {
    pub fn from_profile(profile: &AppleProfile) -> Self {
        match &profile.credentials {
            AppleCredentials::Token { token } => Self {
                bundle_id: profile.bundle_id.clone(),
                bearer_token: Some(token.clone()),
                identity_pem: None,
            },
            AppleCredentials::KeyPair { cert_chain_pem, private_key_pem } => {
                let mut pem = Vec::new();
                for cert in cert_chain_pem {
                    pem.extend_from_slice(cert.as_bytes());
                    if !cert.ends_with('\n') {
                        pem.push(b'\n');
                    }
                }
                pem.extend_from_slice(private_key_pem.as_bytes());
                Self {
                    bundle_id: profile.bundle_id.clone(),
                    bearer_token: None,
                    identity_pem: Some(pem),
                }
            }
        }
    }

    /// Headers attached to every push request.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("apns-topic".to_string(), self.bundle_id.clone())];
        if let Some(token) = &self.bearer_token {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }
        headers
    }

    /// TLS identity for key-pair profiles, configured on the transport.
    pub fn tls_identity(&self) -> Result<Option<reqwest::Identity>, Error> {
        match &self.identity_pem {
            Some(pem) => reqwest::Identity::from_pem(pem)
                .map(Some)
                .map_err(Error::ClientBuild),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::AppleProfile;

    #[test]
    fn bearer_profiles_attach_authorization_and_topic() {
        let profile = AppleProfile::builder()
            .endpoint("https://api.push.apple.com")
            .bundle_id("com.example.app")
            .bearer_token("jwt-token")
            .build()
            .unwrap();
        let auth = ApnsAuth::from_profile(&profile);
        assert_eq!(
            auth.request_headers(),
            vec![
                ("apns-topic".to_string(), "com.example.app".to_string()),
                ("authorization".to_string(), "Bearer jwt-token".to_string()),
            ]
        );
        assert!(auth.tls_identity().unwrap().is_none());
    }

    #[test]
    fn key_pair_profiles_attach_only_the_topic() {
        let profile = AppleProfile::builder()
            .endpoint("https://api.push.apple.com")
            .bundle_id("com.example.app")
            .key_pair(vec!["not-a-cert".to_string()], "not-a-key")
            .build()
            .unwrap();
        let auth = ApnsAuth::from_profile(&profile);
        assert_eq!(
            auth.request_headers(),
            vec![("apns-topic".to_string(), "com.example.app".to_string())]
        );
        // Malformed PEM surfaces as a construction error, not a panic.
        assert!(auth.tls_identity().is_err());
    }
}
