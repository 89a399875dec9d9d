use crate::document::{AttributeMap, IntermediateDocument, Value};
use crate::error::MigrationError;

/// Reads and writes resource declaration files.
pub trait DeclarativeCodec {
    fn parse(&self, file_name: &str, raw: &str) -> Result<IntermediateDocument, MigrationError>;
    fn serialize(&self, doc: &IntermediateDocument) -> Result<String, MigrationError>;
    /// File extension for files written with this codec.
    fn extension(&self) -> &'static str;
}

/// Terraform/OpenTofu HCL. Only `resource` blocks are read; everything else
/// (providers, imports, outputs) is generated separately.
#[derive(Debug, Default, Clone, Copy)]
pub struct HclCodec;

impl DeclarativeCodec for HclCodec {
    fn parse(&self, file_name: &str, raw: &str) -> Result<IntermediateDocument, MigrationError> {
        let body: hcl::Body = hcl::parse(raw).map_err(|e| MigrationError::Codec {
            file: file_name.to_string(),
            message: e.to_string(),
        })?;

        let mut doc = IntermediateDocument::new();
        for block in body.blocks() {
            if block.identifier.as_str() != "resource" || block.labels.len() != 2 {
                continue;
            }
            let resource_type = block.labels[0].as_str();
            let name = block.labels[1].as_str();
            if doc.insert(resource_type, name, body_to_attrs(&block.body)).is_err() {
                return Err(MigrationError::Codec {
                    file: file_name.to_string(),
                    message: format!("duplicate resource {}.{}", resource_type, name),
                });
            }
        }
        Ok(doc)
    }

    fn serialize(&self, doc: &IntermediateDocument) -> Result<String, MigrationError> {
        let mut body = hcl::Body::builder();
        for resource_type in doc.resource_types() {
            for (name, attrs) in doc.resources_of(resource_type) {
                let builder = hcl::Block::builder("resource").add_label(resource_type.as_str()).add_label(name.as_str());
                let builder = add_attrs(builder, attrs, &format!("{}.{}", resource_type, name))?;
                body = body.add_block(builder.build());
            }
        }
        hcl::to_string(&body.build()).map_err(|e| MigrationError::Codec {
            file: "<generated>".to_string(),
            message: e.to_string(),
        })
    }

    fn extension(&self) -> &'static str {
        "tf"
    }
}

pub const API_KEY_VARIABLE: &str = "ibmcloud_api_key";

fn traversal(expr: &str) -> Result<hcl::Expression, MigrationError> {
    expr.parse::<hcl::Expression>().map_err(|e| MigrationError::Codec {
        file: "<generated>".to_string(),
        message: format!("invalid expression '{}': {}", expr, e),
    })
}

fn render(body: hcl::Body) -> Result<String, MigrationError> {
    hcl::to_string(&body).map_err(|e| MigrationError::Codec { file: "<generated>".to_string(), message: e.to_string() })
}

/// `terraform` block pinning the IBM provider and the provider block for `region`.
pub fn provider_file(region: &str, provider_version: &str) -> Result<String, MigrationError> {
    let mut ibm = hcl::Object::new();
    ibm.insert(hcl::ObjectKey::from("source"), hcl::Expression::from("IBM-Cloud/ibm"));
    ibm.insert(hcl::ObjectKey::from("version"), hcl::Expression::from(provider_version));

    let terraform = hcl::Block::builder("terraform")
        .add_block(hcl::Block::builder("required_providers").add_attribute(("ibm", hcl::Expression::Object(ibm))).build())
        .build();
    let provider = hcl::Block::builder("provider")
        .add_label("ibm")
        .add_attribute(("ibmcloud_api_key", traversal(&format!("var.{}", API_KEY_VARIABLE))?))
        .add_attribute(("region", region))
        .build();
    render(hcl::Body::builder().add_block(terraform).add_block(provider).build())
}

pub fn variables_file() -> Result<String, MigrationError> {
    let variable = hcl::Block::builder("variable")
        .add_label(API_KEY_VARIABLE)
        .add_attribute(("type", traversal("string")?))
        .add_attribute(("sensitive", true))
        .add_attribute(("description", "IBM Cloud API key used to create the migrated toolchain"))
        .build();
    render(hcl::Body::builder().add_block(variable).build())
}

/// One `import` block per `(resource address, live id)` pair, in order.
pub fn import_file<'a>(imports: impl IntoIterator<Item = (String, &'a str)>) -> Result<String, MigrationError> {
    let mut body = hcl::Body::builder();
    for (address, id) in imports {
        body = body.add_block(
            hcl::Block::builder("import")
                .add_attribute(("to", traversal(&address)?))
                .add_attribute(("id", id))
                .build(),
        );
    }
    render(body.build())
}

/// `output "toolchain_id"` pointing at the migrated toolchain.
pub fn outputs_file(toolchain_address: &str) -> Result<String, MigrationError> {
    let output = hcl::Block::builder("output")
        .add_label("toolchain_id")
        .add_attribute(("value", traversal(&format!("{}.id", toolchain_address))?))
        .add_attribute(("description", "ID of the migrated toolchain"))
        .build();
    render(hcl::Body::builder().add_block(output).build())
}

fn body_to_attrs(body: &hcl::Body) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    for attribute in body.attributes() {
        attrs.insert(attribute.key.as_str(), expr_to_value(&attribute.expr));
    }

    // Blocks are grouped by identifier; every group starts out as a repeated
    // block and normalization later collapses the singletons.
    let mut groups: hcl::Map<String, Vec<AttributeMap>> = hcl::Map::new();
    for block in body.blocks() {
        groups.entry(block.identifier.as_str().to_string()).or_default().push(body_to_attrs(&block.body));
    }
    for (ident, items) in groups {
        attrs.insert(ident, Value::RepeatedBlock(items));
    }
    attrs
}

fn expr_to_value(expr: &hcl::Expression) -> Value {
    match expr {
        hcl::Expression::Null => Value::Null,
        hcl::Expression::Bool(b) => Value::Bool(*b),
        hcl::Expression::Number(n) => Value::Number(n.clone()),
        hcl::Expression::String(s) => Value::String(s.clone()),
        hcl::Expression::Array(items) => Value::List(items.iter().map(expr_to_value).collect()),
        hcl::Expression::Object(obj) => {
            let mut attrs = AttributeMap::new();
            for (key, value) in obj {
                let key = match key {
                    hcl::ObjectKey::Identifier(ident) => ident.as_str().to_string(),
                    hcl::ObjectKey::Expression(hcl::Expression::String(s)) => s.clone(),
                    hcl::ObjectKey::Expression(other) => other.to_string(),
                    #[allow(unreachable_patterns)]
                    _ => continue,
                };
                attrs.insert(key, expr_to_value(value));
            }
            Value::Object(attrs)
        }
        other => Value::Reference(other.to_string()),
    }
}

fn add_attrs(mut builder: hcl::BlockBuilder, attrs: &AttributeMap, address: &str) -> Result<hcl::BlockBuilder, MigrationError> {
    for (key, value) in attrs.iter() {
        match value {
            Value::Block(map) => {
                builder = builder.add_block(map_to_block(key, map, address)?);
            }
            Value::RepeatedBlock(items) => {
                for item in items {
                    builder = builder.add_block(map_to_block(key, item, address)?);
                }
            }
            other => {
                builder = builder.add_attribute((key.as_str(), value_to_expr(other, address)?));
            }
        }
    }
    Ok(builder)
}

fn map_to_block(ident: &str, map: &AttributeMap, address: &str) -> Result<hcl::Block, MigrationError> {
    Ok(add_attrs(hcl::Block::builder(ident), map, address)?.build())
}

fn value_to_expr(value: &Value, address: &str) -> Result<hcl::Expression, MigrationError> {
    Ok(match value {
        Value::Null => hcl::Expression::Null,
        Value::Bool(b) => hcl::Expression::from(*b),
        Value::Number(n) => hcl::Expression::Number(n.clone()),
        Value::String(s) => hcl::Expression::from(s.clone()),
        Value::Reference(r) => r.parse::<hcl::Expression>().map_err(|e| MigrationError::Codec {
            file: address.to_string(),
            message: format!("invalid reference '{}': {}", r, e),
        })?,
        Value::List(items) => hcl::Expression::Array(
            items.iter().map(|v| value_to_expr(v, address)).collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) | Value::Block(map) => {
            let mut obj = hcl::Object::new();
            for (k, v) in map.iter() {
                obj.insert(hcl::ObjectKey::from(k.clone()), value_to_expr(v, address)?);
            }
            hcl::Expression::Object(obj)
        }
        Value::RepeatedBlock(items) => hcl::Expression::Array(
            items
                .iter()
                .map(|m| value_to_expr(&Value::Object(m.clone()), address))
                .collect::<Result<Vec<_>, _>>()?,
        ),
    })
}
