//! Mapper contract, prompt assembly, and the timeout-guarded adapter.
//!
//! The mapper is an LLM behind a trait: it receives one deterministic
//! prompt (query + numbered responses + schema instruction) and returns
//! the textual envelope that [`super::parser`] understands.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pipeline::CancelToken;

/// Produces the semantic-map envelope for a query and its responses.
#[async_trait]
pub trait Mapper: Send + Sync {
    /// Map the numbered responses into a `<map>`/`<narrative>` envelope.
    async fn map(&self, query: &str, numbered_responses: &[(u32, String)]) -> Result<String>;

    /// Stable identifier of the mapping model.
    fn model_id(&self) -> &str;
}

/// Schema instruction appended to every mapper prompt. Different mapper
/// implementations must receive byte-identical prompts for a given input,
/// so this text is fixed.
const SCHEMA_INSTRUCTION: &str = "\
Return your analysis as a <map> block followed by a <narrative> block.
Inside <map>, emit one <claim id=\"..\" label=\"..\" type=\"factual|prescriptive|conditional|contested|speculative\" sources=\"stmt ids\">claim text</claim> per distinct claim,
<edge source=\"..\" target=\"..\" kind=\"supports|refutes|tradeoff|prerequisite|elaborates\" weight=\"0..1\"/> for relations,
and optional <conditional id=\"..\" claims=\"..\">condition</conditional> gates.
Inside <narrative>, write markdown prose citing responses as [n].";

/// Assemble the deterministic mapper prompt.
pub fn build_prompt(query: &str, numbered_responses: &[(u32, String)]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Query:\n");
    prompt.push_str(query.trim());
    prompt.push_str("\n\nResponses:\n");
    for (model_index, text) in numbered_responses {
        prompt.push_str(&format!("\n[{}]\n{}\n", model_index, text.trim()));
    }
    prompt.push('\n');
    prompt.push_str(SCHEMA_INSTRUCTION);
    prompt
}

/// Timeout- and cancellation-aware wrapper around a [`Mapper`].
#[derive(Clone)]
pub struct MapperAdapter {
    inner: Arc<dyn Mapper>,
    call_timeout: Duration,
}

impl MapperAdapter {
    pub fn new(inner: Arc<dyn Mapper>, call_timeout_ms: u64) -> Self {
        Self {
            inner,
            call_timeout: Duration::from_millis(call_timeout_ms),
        }
    }

    /// Invoke the mapper once. Returns the raw envelope text; parsing is
    /// the caller's next step so a parse failure can still preserve the
    /// raw output.
    pub async fn invoke(
        &self,
        query: &str,
        numbered_responses: &[(u32, String)],
        cancel: &CancelToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("mapper"));
        }
        debug!(model = self.inner.model_id(), "invoking mapper");
        let call = timeout(self.call_timeout, self.inner.map(query, numbered_responses));
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::cancelled("mapper")),
            outcome = call => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::stage_timeout(
                    "mapper",
                    self.call_timeout.as_millis() as u64,
                )),
            },
        }
    }
}
