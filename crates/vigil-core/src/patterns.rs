//! Category → hostname-token tables used by the rule matcher.
//!
//! The table is fixed and extensible, not learned. A rule category token is
//! read word by word, taking the longest key phrase at each position, so
//! `"social media"` selects `social` while `"video games"` selects only the
//! gaming entry and never `video`.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches domain-like tokens such as `example.com` or `m.site.co.uk`.
static DOMAIN_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,}\b")
        .expect("domain token regex is valid")
});

/// Platforms recognised by name in rule descriptions.
pub const WELL_KNOWN_PLATFORMS: &[&str] = &[
    "youtube",
    "tiktok",
    "instagram",
    "facebook",
    "snapchat",
    "twitter",
    "reddit",
    "discord",
    "twitch",
    "roblox",
    "fortnite",
    "minecraft",
    "netflix",
    "pinterest",
    "tumblr",
    "whatsapp",
    "telegram",
    "steam",
];

/// Category → hostname-token table.
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl PatternTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Creates the default table.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();

        let adult = ["porn", "xxx", "adult", "sex", "nsfw", "hentai", "onlyfans", "xvideos"];
        table.insert("adult", adult);
        table.insert("porn", adult);
        table.insert("explicit", adult);

        let gambling = ["casino", "betting", "bet365", "poker", "slots", "gambl", "lottery", "roulette"];
        table.insert("gambling", gambling);
        table.insert("betting", gambling);

        table.insert(
            "social",
            [
                "facebook", "instagram", "tiktok", "snapchat", "twitter", "x.com", "reddit",
                "tumblr", "pinterest", "threads.net",
            ],
        );

        let gaming = [
            "game", "roblox", "fortnite", "minecraft", "steam", "epicgames", "twitch", "itch.io",
            "miniclip",
        ];
        table.insert("gaming", gaming);
        table.insert("games", gaming);
        table.insert("video games", gaming);
        table.insert("video game", gaming);

        let violence = ["violen", "gore", "murder", "brutal", "fight", "bloody"];
        table.insert("violence", violence);
        table.insert("violent", violence);

        let drugs = ["drug", "weed", "cannabis", "marijuana", "vape", "420"];
        table.insert("drugs", drugs);
        table.insert("drug", drugs);

        let weapons = ["gun", "weapon", "firearm", "ammo", "rifle", "knife"];
        table.insert("weapons", weapons);
        table.insert("guns", weapons);

        let video = ["youtube", "youtu.be", "netflix", "hulu", "vimeo", "dailymotion", "twitch"];
        table.insert("video", video);
        table.insert("streaming", video);

        table.insert("dating", ["tinder", "bumble", "hinge", "match.com", "okcupid", "dating"]);
        table.insert("shopping", ["amazon", "ebay", "aliexpress", "temu", "shein", "etsy", "shop"]);
        table.insert("news", ["news", "cnn", "bbc", "foxnews", "nytimes"]);
        table.insert(
            "messaging",
            ["whatsapp", "telegram", "discord", "messenger", "signal.org", "kik"],
        );

        table
    }

    /// Adds (or extends) the patterns for a category key.
    pub fn insert<I, S>(&mut self, category: &str, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self
            .entries
            .entry(category.trim().to_lowercase())
            .or_default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim().to_lowercase();
            if !pattern.is_empty() && !entry.contains(&pattern) {
                entry.push(pattern);
            }
        }
    }

    /// Number of category keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys selected by a rule category token, longest phrase first at each word.
    fn keys_for(&self, token: &str) -> Vec<&[String]> {
        let token = token.to_lowercase();
        let words: Vec<&str> = token.split_whitespace().collect();
        let mut selected = Vec::new();
        let mut i = 0;
        while i < words.len() {
            let found = (1..=words.len() - i).rev().find_map(|len| {
                self.entries
                    .get(&words[i..i + len].join(" "))
                    .map(|patterns| (len, patterns.as_slice()))
            });
            match found {
                Some((len, patterns)) => {
                    selected.push(patterns);
                    i += len;
                }
                None => i += 1,
            }
        }
        selected
    }

    /// Patterns selected by a rule category token.
    pub fn patterns_for(&self, token: &str) -> impl Iterator<Item = &str> + '_ {
        self.keys_for(token)
            .into_iter()
            .flat_map(|patterns| patterns.iter().map(String::as_str))
    }

    /// Returns true if the table maps `token` onto a pattern found in `host`.
    pub fn category_matches(&self, token: &str, host: &str) -> bool {
        self.patterns_for(token).any(|p| host.contains(p))
    }
}

/// Scans a free-text rule description for literal domains or well-known
/// platform names that identify `host`.
pub fn description_matches(description: &str, host: &str) -> bool {
    let description = description.to_lowercase();

    let literal = DOMAIN_TOKEN.find_iter(&description).any(|m| {
        let token = m.as_str().strip_prefix("www.").unwrap_or(m.as_str());
        host == token || host.ends_with(&format!(".{token}"))
    });
    if literal {
        return true;
    }

    WELL_KNOWN_PLATFORMS
        .iter()
        .any(|name| description.contains(name) && host.contains(name))
}
