use serde_yaml::Value;
use tracing::debug;

use crate::env::template::Template;
use crate::env::Environment;
use crate::error::{DockerizedError, Result};

/// Substitutes variables in every string scalar of `value`.
pub fn interpolate(value: Value, env: &Environment) -> Result<Value> {
    Ok(match value {
        Value::String(text) => Value::String(interpolate_str(&text, env)?),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| interpolate(item, env))
                .collect::<Result<_>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key, interpolate(item, env)?);
            }
            Value::Mapping(out)
        }
        Value::Tagged(tagged) => {
            let tagged = *tagged;
            Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                tag: tagged.tag,
                value: interpolate(tagged.value, env)?,
            }))
        }
        other => other,
    })
}

pub fn interpolate_str(text: &str, env: &Environment) -> Result<String> {
    let template = Template::parse(text).map_err(|e| DockerizedError::InvalidConfiguration(e.to_string()))?;
    template.render(&mut |name: &str| {
        let value = env.get(name).map(str::to_string);
        if value.is_none() {
            debug!("The {} variable is not set. Defaulting to a blank string.", name);
        }
        Ok(value)
    })
}
