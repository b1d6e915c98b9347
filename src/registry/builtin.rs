//! Built-in type definitions for the target marketing platform.
//!
//! This is pure schema data. Field lists are intentionally limited to the
//! fields the engine itself acts on (keys, ids, references, templatable
//! and diff-excluded fields); the full per-type business field lists live
//! with the API client collaborator.
//!
//! Two edges are declared soft rather than hard, per the platform's
//! object model: a folder references its parent folder (a self edge that
//! can never be ordered), and an automation may reference a triggered
//! send that in turn references the automation. The order planner
//! excludes soft edges from ordering; the deployer resolves them
//! best-effort in a deferred pass.

use std::collections::BTreeMap;

use super::{CodeExtraction, FieldRule, Pagination, TypeDefinition};
use crate::item::TypeName;

fn base(
    type_name: &str,
    key_field: Option<&str>,
    id_field: &str,
    name_field: &str,
    pagination: Pagination,
) -> TypeDefinition {
    TypeDefinition {
        type_name: TypeName::from(type_name),
        key_field: key_field.map(str::to_string),
        id_field: id_field.to_string(),
        name_field: name_field.to_string(),
        dependencies: Vec::new(),
        soft_dependencies: Vec::new(),
        retrieved_by_default: true,
        pagination,
        fields: BTreeMap::new(),
        references: BTreeMap::new(),
        extract: None,
    }
}

fn deps(def: &mut TypeDefinition, hard: &[&str], soft: &[&str]) {
    def.dependencies = hard.iter().map(|t| TypeName::from(*t)).collect();
    def.soft_dependencies = soft.iter().map(|t| TypeName::from(*t)).collect();
}

fn reference(def: &mut TypeDefinition, raw_field: &str, target: &str) {
    def.references.insert(raw_field.to_string(), TypeName::from(target));
}

fn rule(def: &mut TypeDefinition, field: &str, r: FieldRule) {
    def.fields.insert(field.to_string(), r);
}

/// All built-in definitions, one per supported type.
pub fn definitions() -> Vec<TypeDefinition> {
    let mut out = Vec::new();

    // Folders form the containment hierarchy for almost everything else.
    // The parent reference is a self edge, so it is declared soft.
    let mut folder = base("folder", None, "ID", "Name", Pagination::Soap);
    deps(&mut folder, &[], &["folder"]);
    reference(&mut folder, "ParentFolderID", "folder");
    rule(&mut folder, "ID", FieldRule::read_only());
    rule(&mut folder, "ContentType", FieldRule::default());
    out.push(folder);

    let mut de = base("dataExtension", Some("CustomerKey"), "ObjectID", "Name", Pagination::Soap);
    deps(&mut de, &["folder"], &[]);
    reference(&mut de, "CategoryID", "folder");
    rule(&mut de, "ObjectID", FieldRule::read_only());
    rule(&mut de, "CreatedDate", FieldRule::read_only());
    rule(&mut de, "Name", FieldRule::templatable());
    rule(&mut de, "Description", FieldRule::templatable());
    // Sendability cannot be changed after creation; echoing it back on
    // update is rejected by the API.
    rule(
        &mut de,
        "IsSendable",
        FieldRule {
            updatable: false,
            skip_validation: true,
            ..FieldRule::default()
        },
    );
    out.push(de);

    // Fields are retrieved and deployed through their parent extension.
    let mut de_field =
        base("dataExtensionField", Some("CustomerKey"), "ObjectID", "Name", Pagination::Soap);
    deps(&mut de_field, &["dataExtension"], &[]);
    reference(&mut de_field, "DataExtensionObjectID", "dataExtension");
    de_field.retrieved_by_default = false;
    rule(&mut de_field, "ObjectID", FieldRule::read_only());
    rule(
        &mut de_field,
        "FieldType",
        FieldRule {
            updatable: false,
            skip_validation: true,
            ..FieldRule::default()
        },
    );
    out.push(de_field);

    let mut list = base("list", None, "ID", "ListName", Pagination::Soap);
    deps(&mut list, &["folder"], &[]);
    reference(&mut list, "CategoryID", "folder");
    rule(&mut list, "ID", FieldRule::read_only());
    rule(&mut list, "ListName", FieldRule::templatable());
    out.push(list);

    let mut asset = base("asset", Some("customerKey"), "id", "name", Pagination::Rest);
    deps(&mut asset, &["folder"], &[]);
    reference(&mut asset, "categoryId", "folder");
    asset.extract = Some(CodeExtraction {
        field: "content".into(),
        extension: "html".into(),
    });
    rule(&mut asset, "id", FieldRule::read_only());
    rule(&mut asset, "name", FieldRule::templatable());
    rule(&mut asset, "content", FieldRule::templatable());
    rule(&mut asset, "views.html.content", FieldRule::templatable());
    out.push(asset);

    let mut query = base("query", Some("key"), "queryDefinitionId", "name", Pagination::Rest);
    deps(&mut query, &["dataExtension", "folder"], &[]);
    reference(&mut query, "categoryId", "folder");
    reference(&mut query, "targetId", "dataExtension");
    query.extract = Some(CodeExtraction {
        field: "queryText".into(),
        extension: "sql".into(),
    });
    rule(&mut query, "queryDefinitionId", FieldRule::read_only());
    rule(&mut query, "name", FieldRule::templatable());
    rule(&mut query, "queryText", FieldRule::templatable());
    out.push(query);

    let mut script = base("script", Some("key"), "ssjsActivityId", "name", Pagination::Rest);
    deps(&mut script, &["folder"], &[]);
    reference(&mut script, "categoryId", "folder");
    script.extract = Some(CodeExtraction {
        field: "script".into(),
        extension: "ssjs".into(),
    });
    rule(&mut script, "ssjsActivityId", FieldRule::read_only());
    rule(&mut script, "name", FieldRule::templatable());
    rule(&mut script, "script", FieldRule::templatable());
    out.push(script);

    let mut sender = base("senderProfile", Some("CustomerKey"), "ObjectID", "Name", Pagination::Soap);
    rule(&mut sender, "ObjectID", FieldRule::read_only());
    rule(&mut sender, "FromAddress", FieldRule::templatable());
    rule(&mut sender, "FromName", FieldRule::templatable());
    out.push(sender);

    let mut delivery =
        base("deliveryProfile", Some("CustomerKey"), "ObjectID", "Name", Pagination::Soap);
    rule(&mut delivery, "ObjectID", FieldRule::read_only());
    out.push(delivery);

    let mut send_class =
        base("sendClassification", Some("CustomerKey"), "ObjectID", "Name", Pagination::Soap);
    deps(&mut send_class, &["senderProfile", "deliveryProfile"], &[]);
    reference(&mut send_class, "SenderProfileObjectID", "senderProfile");
    reference(&mut send_class, "DeliveryProfileObjectID", "deliveryProfile");
    rule(&mut send_class, "ObjectID", FieldRule::read_only());
    out.push(send_class);

    let mut esd =
        base("emailSendDefinition", Some("CustomerKey"), "ObjectID", "Name", Pagination::Soap);
    deps(&mut esd, &["sendClassification", "senderProfile", "list", "folder"], &[]);
    reference(&mut esd, "CategoryID", "folder");
    reference(&mut esd, "SendClassificationObjectID", "sendClassification");
    reference(&mut esd, "SenderProfileObjectID", "senderProfile");
    reference(&mut esd, "SendDefinitionListID", "list");
    rule(&mut esd, "ObjectID", FieldRule::read_only());
    rule(&mut esd, "Name", FieldRule::templatable());
    rule(&mut esd, "EmailSubject", FieldRule::templatable());
    out.push(esd);

    let mut triggered =
        base("triggeredSend", Some("CustomerKey"), "ObjectID", "Name", Pagination::Soap);
    deps(&mut triggered, &["list", "senderProfile", "folder"], &[]);
    reference(&mut triggered, "CategoryID", "folder");
    reference(&mut triggered, "SendDefinitionListID", "list");
    reference(&mut triggered, "SenderProfileObjectID", "senderProfile");
    rule(&mut triggered, "ObjectID", FieldRule::read_only());
    rule(&mut triggered, "Name", FieldRule::templatable());
    out.push(triggered);

    let mut file_transfer = base("fileTransfer", Some("key"), "id", "name", Pagination::Rest);
    deps(&mut file_transfer, &["folder"], &[]);
    reference(&mut file_transfer, "categoryId", "folder");
    rule(&mut file_transfer, "id", FieldRule::read_only());
    out.push(file_transfer);

    // Automations reference their activities (queries, scripts, file
    // transfers) and may reference a triggered send, which may itself
    // reference the automation. The latter edge is soft.
    let mut automation = base("automation", Some("key"), "id", "name", Pagination::Rest);
    deps(&mut automation, &["query", "script", "fileTransfer", "folder"], &["triggeredSend"]);
    reference(&mut automation, "categoryId", "folder");
    reference(&mut automation, "triggeredSendId", "triggeredSend");
    rule(&mut automation, "id", FieldRule::read_only());
    rule(&mut automation, "name", FieldRule::templatable());
    out.push(automation);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;

    #[test]
    fn every_declared_dependency_exists() {
        let registry = TypeRegistry::builtin();
        for def in registry.all() {
            for dep in def.dependencies.iter().chain(&def.soft_dependencies) {
                assert!(
                    registry.get(dep).is_ok(),
                    "{} declares unknown dependency {dep}",
                    def.type_name
                );
            }
        }
    }

    #[test]
    fn every_reference_target_exists() {
        let registry = TypeRegistry::builtin();
        for def in registry.all() {
            for target in def.references.values() {
                assert!(
                    registry.get(target).is_ok(),
                    "{} references unknown type {target}",
                    def.type_name
                );
            }
        }
    }

    #[test]
    fn hard_edges_are_acyclic_by_construction() {
        // Soft edges are the only sanctioned cycles; the hard subgraph
        // must stay a DAG or the planner rejects every run.
        let registry = TypeRegistry::builtin();
        let types: Vec<_> = registry.all().map(|d| d.type_name.clone()).collect();
        crate::graph::OrderPlanner::new(&registry).plan(&types).unwrap();
    }

    #[test]
    fn soft_dependencies_have_raw_reference_mappings() {
        // A resolved reference with no raw field mapping never reaches
        // the write payload, which would make the soft edge useless.
        let registry = TypeRegistry::builtin();
        for def in registry.all() {
            for soft in &def.soft_dependencies {
                assert!(
                    def.references.values().any(|t| t == soft),
                    "{} has no raw field for soft dependency {soft}",
                    def.type_name
                );
            }
        }
    }

    #[test]
    fn reference_targets_are_declared_dependencies() {
        let registry = TypeRegistry::builtin();
        for def in registry.all() {
            for target in def.references.values() {
                let declared = def.dependencies.contains(target)
                    || def.soft_dependencies.contains(target)
                    || *target == def.type_name;
                assert!(declared, "{} references undeclared type {target}", def.type_name);
            }
        }
    }
}
