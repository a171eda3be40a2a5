//! Prometheus remote-write wire types
//!
//! Hand-written prost message definitions covering the subset of the
//! remote-write protocol this service reads. Fields the service never
//! looks at (exemplars, native histograms, metadata) are handled by
//! prost's unknown-field skipping during decode.

use prost::Message;

/// Top-level remote-write payload.
#[derive(Clone, PartialEq, Message)]
pub struct WriteRequest {
    #[prost(message, repeated, tag = "1")]
    pub timeseries: Vec<TimeSeries>,
}

/// One series: its identifying labels plus the samples of this push.
#[derive(Clone, PartialEq, Message)]
pub struct TimeSeries {
    #[prost(message, repeated, tag = "1")]
    pub labels: Vec<Label>,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<Sample>,
}

/// Label name/value pair.
#[derive(Clone, PartialEq, Message)]
pub struct Label {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// A single observation: value and epoch-millisecond timestamp.
#[derive(Clone, PartialEq, Message)]
pub struct Sample {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_request_roundtrip() {
        let request = WriteRequest {
            timeseries: vec![TimeSeries {
                labels: vec![Label {
                    name: "__name__".to_string(),
                    value: "container_memory_working_set_bytes".to_string(),
                }],
                samples: vec![Sample {
                    value: 1024.0,
                    timestamp: 1_700_000_000_000,
                }],
            }],
        };

        let mut buf = Vec::new();
        request.encode(&mut buf).unwrap();
        let decoded = WriteRequest::decode(buf.as_slice()).unwrap();

        assert_eq!(decoded, request);
    }

    #[test]
    fn test_decode_empty_payload() {
        let decoded = WriteRequest::decode(&[][..]).unwrap();
        assert!(decoded.timeseries.is_empty());
    }
}
