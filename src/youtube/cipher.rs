//! Signature cipher resolver.
//!
//! Some streams carry an obfuscated signature that the player script
//! un-scrambles in JavaScript before it is attached to the stream URL.
//! The script only ever composes four primitive operations (reverse,
//! slice, splice, swap), so instead of evaluating JavaScript the resolver
//! pattern-matches the minified action table and the decipher routine and
//! replays the call sequence on the signature bytes.
//!
//! Results are cached per player-script path for the lifetime of the
//! process; concurrent resolutions of the same script race benignly
//! (last writer wins, all writers compute the same URL).

use dashmap::DashMap;
use regex::Regex;
use tracing::{debug, info};

use super::format::Format;
use crate::common::errors::{Error, Result};
use crate::common::http::HttpClient;

const DEFAULT_PLAYER_HOST: &str = "https://s.ytimg.com";

const VAR: &str = "[a-zA-Z_\\$][a-zA-Z_0-9]*";
const BEF_ACC: &str = "(?:\\[\\\"|\\.)";
const AFT_ACC: &str = "(?:\\\"\\]|)";

const REVERSE_SHAPE: &str = ":function\\(a\\)\\{(?:return )?a\\.reverse\\(\\)\\}";
const SLICE_SHAPE: &str = ":function\\(a,b\\)\\{return a\\.slice\\(b\\)\\}";
const SPLICE_SHAPE: &str = ":function\\(a,b\\)\\{a\\.splice\\(0,b\\)\\}";
const SWAP_SHAPE: &str = ":function\\(a,b\\)\\{var c=a\\[0\\];a\\[0\\]=a\\[b%a\\.length\\];a\\[b(?:%a.length|)\\]=c(?:;return a)?\\}";

/// The three effects a decipher call can have on the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CipherOp {
    Reverse,
    /// Covers both `slice` and `splice`: drop the first `n` bytes.
    Slice,
    Swap,
}

pub(crate) fn apply_op(signature: &mut Vec<u8>, op: CipherOp, n: usize) {
    match op {
        CipherOp::Reverse => signature.reverse(),
        CipherOp::Slice => {
            signature.drain(..n.min(signature.len()));
        }
        CipherOp::Swap => {
            if !signature.is_empty() {
                let len = signature.len();
                signature.swap(0, n % len);
            }
        }
    }
}

#[derive(Debug)]
pub struct CipherResolver {
    client: reqwest::Client,
    player_host: String,
    cache: DashMap<String, String>,
    action_table: Regex,
    decipher_fn: Regex,
}

impl CipherResolver {
    pub fn new() -> Result<Self> {
        let var_def = format!("\\\"?{VAR}\\\"?");
        let action_table = Regex::new(&format!(
            "var ({VAR})=\\{{((?:(?:{var_def}{REVERSE_SHAPE}|{var_def}{SLICE_SHAPE}|{var_def}{SPLICE_SHAPE}|{var_def}{SWAP_SHAPE}),?\\n?)+)\\}};"
        ))
        .map_err(|e| Error::Cipher(e.to_string()))?;
        let decipher_fn = Regex::new(&format!(
            "function(?: {VAR})?\\(a\\)\\{{a=a\\.split\\(\\\"\\\"\\);\\s*((?:(?:a=)?{VAR}{BEF_ACC}{VAR}{AFT_ACC}\\(a,\\d+\\);)+)return a\\.join\\(\\\"\\\"\\)\\}}"
        ))
        .map_err(|e| Error::Cipher(e.to_string()))?;

        Ok(Self {
            client: HttpClient::new()?,
            player_host: DEFAULT_PLAYER_HOST.to_string(),
            cache: DashMap::new(),
            action_table,
            decipher_fn,
        })
    }

    /// Overrides the player-script host (tests point this at a local mock).
    pub fn with_player_host(mut self, host: impl Into<String>) -> Self {
        self.player_host = host.into();
        self
    }

    /// Returns a fetchable URL for `format`, deciphering the signature when
    /// one is present. Cached per player-script path.
    pub async fn resolve(&self, format: &Format) -> Result<String> {
        if format.signature.is_empty() {
            return Ok(format.url.clone());
        }
        if let Some(hit) = self.cache.get(&format.player_script) {
            debug!("cipher cache hit for {}", format.player_script);
            return Ok(hit.value().clone());
        }

        let script = self.fetch_player_script(&format.player_script).await?;
        let url = self.decipher(format, &script)?;
        info!("deciphered signature via {}", format.player_script);
        self.cache.insert(format.player_script.clone(), url.clone());
        Ok(url)
    }

    async fn fetch_player_script(&self, path: &str) -> Result<String> {
        let url = format!("{}{}", self.player_host, path);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "player script fetch failed with status {}",
                response.status()
            )));
        }
        Ok(response.text().await?)
    }

    fn decipher(&self, format: &Format, script: &str) -> Result<String> {
        let signature = decipher_signature(
            &self.action_table,
            &self.decipher_fn,
            script,
            &format.signature,
        )?;

        let mut url = url::Url::parse(&format.url)
            .map_err(|e| Error::Unplayable(format!("invalid stream url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("ratebypass", "yes")
            .append_pair(&format.signature_key, &signature);
        Ok(url.into())
    }
}

/// Extracts the member name bound to `shape` inside the action-table body.
fn extract_member(shape: &str, body: &str) -> Option<String> {
    let pattern = format!("(?m:^|,)\\\"?({VAR})\\\"?{shape}");
    let re = Regex::new(&pattern).ok()?;
    re.captures(body).map(|c| c[1].to_string())
}

/// Replays the player script's decipher routine over `signature` and
/// returns the transformed string.
pub(crate) fn decipher_signature(
    action_table: &Regex,
    decipher_fn: &Regex,
    script: &str,
    signature: &str,
) -> Result<String> {
    let actions = action_table
        .captures(script)
        .ok_or_else(|| Error::Cipher("unable to decipher: couldn't find any submatches".into()))?;
    let object = actions.get(1).map_or("", |m| m.as_str());
    let body = actions.get(2).map_or("", |m| m.as_str());

    let reverse_key = extract_member(REVERSE_SHAPE, body);
    let slice_key = extract_member(SLICE_SHAPE, body);
    let splice_key = extract_member(SPLICE_SHAPE, body);
    let swap_key = extract_member(SWAP_SHAPE, body);

    let members: Vec<String> = [&reverse_key, &slice_key, &splice_key, &swap_key]
        .into_iter()
        .flatten()
        .map(|k| regex::escape(k))
        .collect();

    let calls = decipher_fn
        .captures(script)
        .ok_or_else(|| Error::Cipher("can't find decipher".into()))?;
    let call_body = calls.get(1).map_or("", |m| m.as_str());

    let extractor = Regex::new(&format!(
        "(?:a=)?{}{BEF_ACC}({}){AFT_ACC}\\(a,(\\d+)\\)",
        regex::escape(object),
        members.join("|"),
    ))
    .map_err(|e| Error::Cipher(e.to_string()))?;

    let mut sig: Vec<u8> = signature.as_bytes().to_vec();
    for call in extractor.captures_iter(call_body) {
        let member = &call[1];
        let n: usize = match call[2].parse() {
            Ok(n) => n,
            Err(_) => {
                debug!("skipping cipher op with unparsable argument");
                continue;
            }
        };
        if reverse_key.as_deref() == Some(member) {
            apply_op(&mut sig, CipherOp::Reverse, n);
        } else if swap_key.as_deref() == Some(member) {
            apply_op(&mut sig, CipherOp::Swap, n);
        } else if slice_key.as_deref() == Some(member) || splice_key.as_deref() == Some(member) {
            apply_op(&mut sig, CipherOp::Slice, n);
        }
    }

    Ok(sig.iter().map(|&b| b as char).collect())
}
