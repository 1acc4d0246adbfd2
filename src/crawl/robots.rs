use std::collections::HashMap;

use tracing::debug;
use url::Url;

/// Disallow rules extracted from one host's robots.txt.
///
/// Only the subset the crawler needs: `User-agent` groups and `Disallow`
/// path prefixes. An unreachable or unparseable file allows everything.
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    disallow: Vec<String>,
}

impl RobotsPolicy {
    /// Parse robots.txt, keeping rules from `*` groups and groups whose
    /// user-agent token is a prefix of `user_agent` (case-insensitive).
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let ua_lower = user_agent.to_lowercase();
        let mut disallow = Vec::new();
        let mut group_applies = false;
        let mut in_group_header = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    // A new block of user-agent lines resets applicability.
                    if !in_group_header {
                        group_applies = false;
                        in_group_header = true;
                    }
                    let token = value.to_lowercase();
                    if token == "*" || ua_lower.contains(&token) {
                        group_applies = true;
                    }
                }
                "disallow" => {
                    in_group_header = false;
                    if group_applies && !value.is_empty() {
                        disallow.push(value.to_string());
                    }
                }
                _ => {
                    in_group_header = false;
                }
            }
        }
        Self { disallow }
    }

    pub fn allows(&self, path: &str) -> bool {
        !self.disallow.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Per-host robots.txt cache. Fetch failures are remembered as
/// allow-everything so each host is probed at most once.
#[derive(Debug, Default)]
pub struct RobotsCache {
    policies: HashMap<String, RobotsPolicy>,
}

impl RobotsCache {
    pub async fn allows(
        &mut self,
        client: &reqwest::Client,
        url: &Url,
        user_agent: &str,
    ) -> bool {
        let Some(host) = url.host_str() else {
            return true;
        };
        let key = host.to_string();
        if !self.policies.contains_key(&key) {
            let policy = self.fetch_policy(client, url, user_agent).await;
            self.policies.insert(key.clone(), policy);
        }
        self.policies
            .get(&key)
            .map(|p| p.allows(url.path()))
            .unwrap_or(true)
    }

    async fn fetch_policy(
        &self,
        client: &reqwest::Client,
        url: &Url,
        user_agent: &str,
    ) -> RobotsPolicy {
        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);

        match client.get(robots_url.as_str()).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => RobotsPolicy::parse(&body, user_agent),
                Err(_) => RobotsPolicy::default(),
            },
            Ok(resp) => {
                debug!("robots.txt for {} returned {}", url.host_str().unwrap_or(""), resp.status());
                RobotsPolicy::default()
            }
            Err(e) => {
                debug!("robots.txt fetch failed for {}: {e}", url.host_str().unwrap_or(""));
                RobotsPolicy::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
# sample
User-agent: *
Disallow: /private/
Disallow: /tmp/

User-agent: thinkmark
Disallow: /no-bots/
";

    #[test]
    fn wildcard_rules_apply_to_everyone() {
        let policy = RobotsPolicy::parse(ROBOTS, "otherbot/1.0");
        assert!(!policy.allows("/private/page.html"));
        assert!(policy.allows("/public/page.html"));
        assert!(policy.allows("/no-bots/page.html"));
    }

    #[test]
    fn named_group_applies_to_matching_agent() {
        let policy = RobotsPolicy::parse(ROBOTS, "thinkmark/0.2");
        assert!(!policy.allows("/no-bots/page.html"));
        assert!(!policy.allows("/private/page.html"));
    }

    #[test]
    fn empty_or_garbage_allows_all() {
        let policy = RobotsPolicy::parse("", "thinkmark");
        assert!(policy.allows("/anything"));
        let policy = RobotsPolicy::parse("not a robots file", "thinkmark");
        assert!(policy.allows("/anything"));
    }
}
