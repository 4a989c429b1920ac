use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::Pane;
use crate::context::RequestContext;

/// Pause between keys of a multi-key answer so the menu can redraw
const KEY_GAP: Duration = Duration::from_millis(150);

/// How to answer Gemini's "Do you want to proceed?" prompt
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    /// Allow this one action
    #[default]
    Once,
    /// Allow this kind of action for the rest of the session
    Always,
    /// Refuse the action
    Decline,
}

impl PermissionPolicy {
    /// tmux key names sent for this answer, in order
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            PermissionPolicy::Once => &["Enter"],
            PermissionPolicy::Always => &["Down", "Enter"],
            PermissionPolicy::Decline => &["Escape"],
        }
    }

    /// Answer a pending prompt on `pane`
    pub async fn respond<P: Pane + ?Sized>(self, pane: &mut P, ctx: &mut RequestContext) -> Result<()> {
        info!(request = ctx.id(), policy = ?self, "Answering permission prompt");
        for (i, key) in self.keys().iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(KEY_GAP).await;
            }
            pane.send_key(key, ctx).await?;
        }
        ctx.mark("permission_answered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct KeyRecorder {
        keys: Vec<String>,
    }

    #[async_trait]
    impl Pane for KeyRecorder {
        async fn capture(&mut self, _ctx: &mut RequestContext) -> Result<String> {
            Ok(String::new())
        }

        async fn send_key(&mut self, key: &str, _ctx: &mut RequestContext) -> Result<()> {
            self.keys.push(key.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_policies_send_expected_keys() {
        let cases = [
            (PermissionPolicy::Once, vec!["Enter"]),
            (PermissionPolicy::Always, vec!["Down", "Enter"]),
            (PermissionPolicy::Decline, vec!["Escape"]),
        ];
        for (policy, expected) in cases {
            let mut pane = KeyRecorder::default();
            let mut ctx = RequestContext::new("test");
            policy.respond(&mut pane, &mut ctx).await.unwrap();
            assert_eq!(pane.keys, expected);
            assert_eq!(ctx.commands().len(), 0);
            assert_eq!(ctx.timings()[0].label, "permission_answered");
        }
    }

    #[test]
    fn test_policy_deserializes_lowercase() {
        let policy: PermissionPolicy = serde_json::from_str("\"always\"").unwrap();
        assert_eq!(policy, PermissionPolicy::Always);
        assert_eq!(PermissionPolicy::default(), PermissionPolicy::Once);
    }
}
