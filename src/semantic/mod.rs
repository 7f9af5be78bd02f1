//! Semantic mapping: mapper invocation, envelope parsing, canonical
//! printing, and the claim/edge/conditional types the rest of the
//! pipeline consumes.

pub mod mapper;
pub mod parser;
pub mod printer;
pub mod types;

pub use mapper::{build_prompt, Mapper, MapperAdapter};
pub use parser::{parse_envelope, ParsedEnvelope};
pub use printer::print_envelope;
pub use types::{
    Claim, ClaimId, ClaimRole, ClaimType, Conditional, EdgeKind, SemanticEdge, SemanticMap,
};
