use crate::{Error, Map};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Response is one execution result emitted by a link chain.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub errors: Vec<GraphQLError>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Map::is_empty"
    )]
    pub extensions: Map,
}

/// GraphQLError is an error reported by a GraphQL server within a Response.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub locations: Vec<Location>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub path: Vec<Value>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Map::is_empty"
    )]
    pub extensions: Map,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Response {
    /// Build a successful Response carrying `data`.
    pub fn data(data: impl Into<Value>) -> Self {
        Self {
            data: Some(data.into()),
            ..Default::default()
        }
    }

    /// Build a Response carrying only GraphQL `errors`.
    pub fn errors(errors: Vec<GraphQLError>) -> Self {
        Self {
            errors,
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Decode the data of this Response into `D`, failing if the Response
    /// carries GraphQL errors or has no data.
    pub fn into_data<D: serde::de::DeserializeOwned>(self) -> crate::Result<D> {
        if self.has_errors() {
            tracing::warn!(errors = ?self.errors, "graphql response has errors");
            return Err(Error::GraphQL(self.errors));
        }
        let data = self.data.ok_or(Error::NoData)?;
        serde_json::from_value(data).map_err(|err| Error::Decode(Arc::new(err)))
    }
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: Map::new(),
        }
    }
}

impl std::fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;

        if !self.path.is_empty() {
            f.write_str(" (at ")?;
            for (index, part) in self.path.iter().enumerate() {
                if index != 0 {
                    f.write_str(".")?;
                }
                match part {
                    Value::String(field) => f.write_str(field)?,
                    other => write!(f, "{other}")?,
                }
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl<D: serde::Serialize> TryFrom<graphql_client::Response<D>> for Response {
    type Error = Error;

    fn try_from(response: graphql_client::Response<D>) -> Result<Self, Self::Error> {
        serde_json::to_value(&response)
            .and_then(serde_json::from_value)
            .map_err(|err| Error::Decode(Arc::new(err)))
    }
}

// Servers (and graphql_client) may send explicit nulls for absent lists and maps.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + serde::Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_data() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Data {
            id: u32,
        }

        let ok: Data = Response::data(json!({"id": 1})).into_data().unwrap();
        assert_eq!(ok, Data { id: 1 });

        let err = Response::errors(vec![GraphQLError {
            path: vec![json!("node"), json!(0), json!("id")],
            ..GraphQLError::new("not found")
        }])
        .into_data::<Data>()
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "graphql response has errors: [not found (at node.0.id)]"
        );

        let err = Response::default().into_data::<Data>().unwrap_err();
        assert!(matches!(err, Error::NoData), "{err:?}");

        let err = Response::data(json!({"id": "one"}))
            .into_data::<Data>()
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "{err:?}");
    }

    #[test]
    fn test_from_graphql_client_response() {
        let wire = json!({
            "data": {"viewer": {"login": "someone"}},
            "errors": [{
                "message": "partial failure",
                "locations": [{"line": 2, "column": 3}],
                "path": ["viewer", "repositories"],
            }],
        });
        let response: graphql_client::Response<Value> = serde_json::from_value(wire).unwrap();
        let response = Response::try_from(response).unwrap();

        insta::assert_json_snapshot!(response, @r###"
        {
          "data": {
            "viewer": {
              "login": "someone"
            }
          },
          "errors": [
            {
              "message": "partial failure",
              "locations": [
                {
                  "line": 2,
                  "column": 3
                }
              ],
              "path": [
                "viewer",
                "repositories"
              ]
            }
          ]
        }
        "###);
    }
}
