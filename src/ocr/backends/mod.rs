//! Concrete `OcrBackend` implementations (`SPEC_FULL.md` §6.4.1).

pub mod textract;
pub mod vision_llm;
