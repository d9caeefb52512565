//! robots.txt parsing.
//!
//! Only the group that applies to our user agent is kept: a group naming our
//! product token wins over the `*` group. `Sitemap:` lines are global.

/// Rules from robots.txt that apply to one user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    pub allowed: Vec<String>,
    pub disallowed: Vec<String>,
    /// Seconds.
    pub crawl_delay: Option<f32>,
    pub sitemaps: Vec<String>,
}

impl RobotsRules {
    /// Longest matching rule wins; an allow wins a tie.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| path_matches(path, p))
                .map(String::len)
                .max()
        };

        match (longest(&self.allowed), longest(&self.disallowed)) {
            (Some(allow), Some(disallow)) => allow >= disallow,
            (_, Some(_)) => false,
            _ => true,
        }
    }
}

#[derive(Default)]
struct Group {
    allowed: Vec<String>,
    disallowed: Vec<String>,
    crawl_delay: Option<f32>,
}

/// Lowercased product token of a User-Agent string (`PersonaMap/0.1` → `personamap`).
fn product_token(user_agent: &str) -> String {
    user_agent
        .split(['/', ' '])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Parse a robots.txt body for `user_agent`.
pub fn parse_robots(txt: &str, user_agent: &str) -> RobotsRules {
    let token = product_token(user_agent);

    let mut specific: Option<Group> = None;
    let mut wildcard: Option<Group> = None;
    let mut sitemaps = Vec::new();

    // Agents named by the current run of User-agent lines.
    let mut current_agents: Vec<String> = Vec::new();
    let mut in_agent_lines = false;
    let mut current = Group::default();

    let mut flush = |agents: &[String], group: Group| {
        if agents.iter().any(|a| !token.is_empty() && a == &token) {
            specific.get_or_insert_with(Group::default).merge(group);
        } else if agents.iter().any(|a| a == "*") {
            wildcard.get_or_insert_with(Group::default).merge(group);
        }
    };

    for raw in txt.lines() {
        let line = raw.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if !in_agent_lines {
                    flush(&current_agents, std::mem::take(&mut current));
                    current_agents.clear();
                }
                current_agents.push(product_token(value));
                in_agent_lines = true;
            }
            "allow" => {
                in_agent_lines = false;
                if !value.is_empty() {
                    current.allowed.push(value.to_string());
                }
            }
            "disallow" => {
                in_agent_lines = false;
                if !value.is_empty() {
                    current.disallowed.push(value.to_string());
                }
            }
            "crawl-delay" => {
                in_agent_lines = false;
                if let Ok(delay) = value.parse::<f32>() {
                    current.crawl_delay = Some(delay);
                }
            }
            "sitemap" => {
                if !value.is_empty() && !sitemaps.iter().any(|s| s == value) {
                    sitemaps.push(value.to_string());
                }
            }
            _ => {}
        }
    }
    flush(&current_agents, current);

    let group = specific.or(wildcard).unwrap_or_default();
    RobotsRules {
        allowed: group.allowed,
        disallowed: group.disallowed,
        crawl_delay: group.crawl_delay,
        sitemaps,
    }
}

impl Group {
    fn merge(&mut self, other: Group) {
        self.allowed.extend(other.allowed);
        self.disallowed.extend(other.disallowed);
        if other.crawl_delay.is_some() {
            self.crawl_delay = other.crawl_delay;
        }
    }
}

/// Prefix match with `*` wildcards and an optional `$` end anchor.
fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }

    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return false;
    };
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };

    let pieces: Vec<&str> = parts.collect();
    for (i, piece) in pieces.iter().enumerate() {
        let is_last = i == pieces.len() - 1;
        if is_last && anchored {
            return rest.ends_with(piece);
        }
        match rest.find(piece) {
            Some(pos) => rest = &rest[pos + piece.len()..],
            None => return false,
        }
    }

    !anchored || rest.is_empty()
}
