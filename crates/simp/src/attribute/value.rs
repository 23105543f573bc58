use crate::net::codec::{self, CodecError, SubjectReader};

use super::key::AttributeShape;

pub type Color = glam::Vec4;

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Text(String),
    FloatArray(Vec<f32>),
}

impl AttributeValue {
    pub fn shape(&self) -> AttributeShape {
        match self {
            AttributeValue::Float(_) => AttributeShape::Float,
            AttributeValue::Int(_) => AttributeShape::Int,
            AttributeValue::Bool(_) => AttributeShape::Bool,
            AttributeValue::Text(_) => AttributeShape::Text,
            AttributeValue::FloatArray(_) => AttributeShape::FloatArray,
        }
    }

    /// Number of elements announced by the count prefix. Scalars count as one.
    pub fn element_count(&self) -> u32 {
        match self {
            AttributeValue::FloatArray(values) => values.len() as u32,
            _ => 1,
        }
    }

    /// Value bytes without the count prefix.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            AttributeValue::Float(value) => codec::encode_f32(*value).to_vec(),
            AttributeValue::Int(value) => codec::encode_i32(*value).to_vec(),
            AttributeValue::Bool(value) => codec::encode_bool(*value).to_vec(),
            AttributeValue::Text(value) => codec::encode_string(value),
            AttributeValue::FloatArray(values) => {
                let mut out = Vec::with_capacity(values.len() * 4);
                for value in values {
                    out.extend_from_slice(&codec::encode_f32(*value));
                }
                out
            }
        }
    }

    /// Reads one value of `shape`, including the count prefix of arrays.
    pub fn decode(
        shape: AttributeShape,
        reader: &mut SubjectReader<'_>,
    ) -> Result<Self, CodecError> {
        Ok(match shape {
            AttributeShape::Float => AttributeValue::Float(reader.read_f32()?),
            AttributeShape::Int => AttributeValue::Int(reader.read_i32()?),
            AttributeShape::Bool => AttributeValue::Bool(reader.read_bool()?),
            AttributeShape::Text => AttributeValue::Text(reader.read_string()?),
            AttributeShape::FloatArray => {
                let count = reader.read_u32()?;
                AttributeValue::FloatArray(reader.read_f32_array(count)?)
            }
        })
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            AttributeValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            AttributeValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        match self {
            AttributeValue::FloatArray(values) => Some(values),
            _ => None,
        }
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<Vec<f32>> for AttributeValue {
    fn from(values: Vec<f32>) -> Self {
        AttributeValue::FloatArray(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_count_comes_from_the_reader() {
        let value = AttributeValue::from(vec![1.0, -2.5, 3.25]);
        assert_eq!(value.element_count(), 3);

        let mut bytes = codec::encode_u32(value.element_count()).to_vec();
        bytes.extend_from_slice(&value.encode());
        assert_eq!(bytes.len(), 4 + 12);

        let mut reader = SubjectReader::new(&bytes);
        let decoded = AttributeValue::decode(AttributeShape::FloatArray, &mut reader).unwrap();
        assert_eq!(decoded, value);
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_scalar_shapes() {
        let cases = [
            AttributeValue::Float(0.5),
            AttributeValue::Int(-7),
            AttributeValue::Bool(true),
            AttributeValue::from("pc"),
        ];
        for value in cases {
            let bytes = value.encode();
            let mut reader = SubjectReader::new(&bytes);
            assert_eq!(AttributeValue::decode(value.shape(), &mut reader).unwrap(), value);
            assert_eq!(value.element_count(), 1);
        }
    }

    #[test]
    fn test_short_value_is_truncated() {
        let bytes = [0x3f, 0x80];
        let mut reader = SubjectReader::new(&bytes);
        assert!(matches!(
            AttributeValue::decode(AttributeShape::Float, &mut reader),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(AttributeValue::Float(2.0).as_f32(), Some(2.0));
        assert_eq!(AttributeValue::Float(2.0).as_bool(), None);
        assert_eq!(AttributeValue::from("km").as_str(), Some("km"));
        assert_eq!(AttributeValue::Int(3).as_i32(), Some(3));
        assert_eq!(
            AttributeValue::from(vec![1.0]).as_f32_slice(),
            Some([1.0f32].as_slice())
        );
    }
}
