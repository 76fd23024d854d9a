use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ModelError {
    #[snafu(display("failed to decode '{response_type}' item on `{stage}`: {source}"))]
    DecodeItem {
        stage: &'static str,
        response_type: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to encode item on `{stage}`: {source}"))]
    EncodeItem {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("expected a JSON object for {what} on `{stage}`"))]
    NotAnObject {
        stage: &'static str,
        what: &'static str,
    },
    #[snafu(display("item is missing a string `response_type` on `{stage}`"))]
    MissingResponseType { stage: &'static str },
    #[snafu(display("failed to decode message on `{stage}`: {source}"))]
    DecodeMessage {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to decode stream chunk on `{stage}`: {source}"))]
    DecodeChunk {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type ModelResult<T> = Result<T, ModelError>;
