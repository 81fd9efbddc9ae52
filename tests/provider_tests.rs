use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use part_composer::{
    load_factory, register_provider_factory, ComposableCatalog, CompositionError, Configuration,
    ExportConstraint, ExportDefinition, ExportProvider, ExportingMember, ImportCardinality,
    ImportDefinition, ImportingMember, MemberRef, MetadataValue, PartDefinition, PartValue,
    ProviderFacade, TypeRef,
};

fn contract<T: 'static>() -> &'static str {
    std::any::type_name::<T>()
}

fn downcast<T: Send + Sync + 'static>(value: &PartValue) -> Result<Arc<T>, CompositionError> {
    value
        .clone()
        .downcast::<T>()
        .map_err(|_| CompositionError::TypeMismatch {
            contract: std::any::type_name::<T>().to_string(),
        })
}

fn provider_for(parts: impl IntoIterator<Item = Arc<PartDefinition>>) -> ExportProvider {
    let mut catalog = ComposableCatalog::new();
    catalog.add_parts(parts);
    ExportProvider::for_configuration(Arc::new(Configuration::create(catalog).unwrap()))
}

struct Greeter;

fn greeter_part() -> Arc<PartDefinition> {
    PartDefinition::new(TypeRef::of::<Greeter>())
        .with_export(ExportDefinition::new(contract::<Greeter>()))
        .with_constructor(vec![], |_, _: &[TypeRef]| Ok(Arc::new(Greeter) as PartValue))
        .shared()
        .into_arc()
}

// ---------------------------------------------------------------------------
// Cardinality and optional imports
// ---------------------------------------------------------------------------

struct Formatter;
struct Report {
    formatter: Option<Arc<Formatter>>,
}

fn report_part() -> Arc<PartDefinition> {
    PartDefinition::new(TypeRef::of::<Report>())
        .with_export(ExportDefinition::new(contract::<Report>()))
        .with_constructor(
            vec![ImportDefinition::new(
                contract::<Formatter>(),
                ImportCardinality::ZeroOrOne,
            )],
            |mut imports, _: &[TypeRef]| {
                let formatter = imports
                    .remove(0)
                    .into_single()
                    .and_then(|v| v.downcast::<Formatter>().ok());
                Ok(Arc::new(Report { formatter }) as PartValue)
            },
        )
        .into_arc()
}

/// An optional import with no exporter resolves to nothing and the part
/// still composes.
#[test]
fn optional_import_left_unset() {
    let provider = provider_for([report_part()]);

    let report = provider.get_exported_value::<Report>().unwrap();
    assert!(report.formatter.is_none());
}

struct SvcA;
struct SvcB;

fn dual_service_catalog() -> Vec<Arc<PartDefinition>> {
    let a = PartDefinition::new(TypeRef::of::<SvcA>())
        .with_export(ExportDefinition::new("svc"))
        .with_constructor(vec![], |_, _: &[TypeRef]| Ok(Arc::new(SvcA) as PartValue))
        .into_arc();
    let b = PartDefinition::new(TypeRef::of::<SvcB>())
        .with_export(ExportDefinition::new("svc"))
        .with_constructor(vec![], |_, _: &[TypeRef]| Ok(Arc::new(SvcB) as PartValue))
        .into_arc();
    vec![a, b]
}

/// `ExactlyOne` with two matching exports is a resolution failure.
#[test]
fn exactly_one_with_two_matches_fails() {
    let provider = provider_for(dual_service_catalog());

    match provider.get_export_named::<SvcA>("svc") {
        Err(CompositionError::ImportCardinalityMismatch { found, .. }) => assert_eq!(found, 2),
        Err(other) => panic!("expected cardinality mismatch, got {other}"),
        Ok(_) => panic!("expected cardinality mismatch, got an export"),
    }
}

/// `ZeroOrOne` tolerates zero matches but not two.
#[test]
fn zero_or_one_with_two_matches_fails() {
    let provider = provider_for(dual_service_catalog());

    let import = ImportDefinition::new("svc", ImportCardinality::ZeroOrOne);
    match provider.exports_for(&import) {
        Err(CompositionError::ImportCardinalityMismatch { found, .. }) => assert_eq!(found, 2),
        Err(other) => panic!("expected cardinality mismatch, got {other}"),
        Ok(_) => panic!("expected cardinality mismatch, got exports"),
    }

    let absent = ImportDefinition::new("no-such-contract", ImportCardinality::ZeroOrOne);
    assert!(provider.exports_for(&absent).unwrap().is_empty());
}

struct PluginInfo {
    name: &'static str,
}
struct PluginA;
struct PluginB;

/// `ZeroOrMore` returns every match, in catalog order.
#[test]
fn zero_or_more_collects_all() {
    let a = PartDefinition::new(TypeRef::of::<PluginA>())
        .with_export(ExportDefinition::new("plugin"))
        .with_constructor(vec![], |_, _: &[TypeRef]| {
            Ok(Arc::new(PluginInfo { name: "a" }) as PartValue)
        })
        .into_arc();
    let b = PartDefinition::new(TypeRef::of::<PluginB>())
        .with_export(ExportDefinition::new("plugin"))
        .with_constructor(vec![], |_, _: &[TypeRef]| {
            Ok(Arc::new(PluginInfo { name: "b" }) as PartValue)
        })
        .into_arc();
    let provider = provider_for([a, b]);

    let plugins = provider.get_exports_named::<PluginInfo>("plugin").unwrap();
    let names: Vec<&str> = plugins
        .iter()
        .map(|p| p.value().unwrap().name)
        .collect();
    assert_eq!(names, ["a", "b"]);
}

/// The typed edge reports a downcast failure against the contract.
#[test]
fn wrong_type_reports_mismatch() {
    let provider = provider_for([greeter_part()]);

    let lazy = provider
        .get_export_named::<Formatter>(contract::<Greeter>())
        .unwrap();
    match lazy.value() {
        Err(CompositionError::TypeMismatch { contract: reported }) => {
            assert_eq!(reported, contract::<Greeter>());
        }
        Err(other) => panic!("expected type mismatch, got {other}"),
        Ok(_) => panic!("expected type mismatch, got a value"),
    }
}

// ---------------------------------------------------------------------------
// Constraints and metadata
// ---------------------------------------------------------------------------

struct HandlerA;
struct HandlerB;

fn handler_parts() -> Vec<Arc<PartDefinition>> {
    let a = PartDefinition::new(TypeRef::of::<HandlerA>())
        .with_export(ExportDefinition::new("handler").with_metadata("mode", "alpha"))
        .with_constructor(vec![], |_, _: &[TypeRef]| Ok(Arc::new(HandlerA) as PartValue))
        .into_arc();
    let b = PartDefinition::new(TypeRef::of::<HandlerB>())
        .with_export(ExportDefinition::new("handler").with_metadata("mode", "beta"))
        .with_constructor(vec![], |_, _: &[TypeRef]| Ok(Arc::new(HandlerB) as PartValue))
        .into_arc();
    vec![a, b]
}

/// Constraints narrow the candidate set before cardinality is enforced,
/// and the winning export's metadata rides along with the value.
#[test]
fn constraints_filter_candidates() {
    let provider = provider_for(handler_parts());

    let import = ImportDefinition::new("handler", ImportCardinality::ExactlyOne).with_constraint(
        ExportConstraint::MetadataEquals {
            key: "mode".to_string(),
            value: MetadataValue::String("alpha".to_string()),
        },
    );
    let exports = provider.exports_for(&import).unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(
        exports[0].metadata().get("mode").and_then(MetadataValue::as_str),
        Some("alpha")
    );
    assert!(downcast::<HandlerA>(&exports[0].value().unwrap()).is_ok());
}

// ---------------------------------------------------------------------------
// Lazy failure semantics
// ---------------------------------------------------------------------------

struct Orphan;

/// A part without an importing constructor resolves, but its value fails
/// lazily on first evaluation.
#[test]
fn missing_constructor_fails_lazily() {
    let orphan = PartDefinition::new(TypeRef::of::<Orphan>())
        .with_export(ExportDefinition::new(contract::<Orphan>()))
        .into_arc();
    let provider = provider_for([orphan]);

    let lazy = provider.get_export::<Orphan>().unwrap();
    match lazy.value() {
        Err(CompositionError::MissingImportingConstructor { part }) => {
            assert!(part.contains("Orphan"), "part: {part}");
        }
        Err(other) => panic!("expected missing-constructor error, got {other}"),
        Ok(_) => panic!("expected missing-constructor error, got a value"),
    }
}

struct Flaky;

/// A failed construction is not memoized; the lazy may be retried.
#[test]
fn failed_construction_can_be_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let ctor_attempts = attempts.clone();
    let flaky = PartDefinition::new(TypeRef::of::<Flaky>())
        .with_export(ExportDefinition::new(contract::<Flaky>()))
        .with_constructor(vec![], move |_, _: &[TypeRef]| {
            if ctor_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CompositionError::CompositionFailed {
                    reasons: vec!["warming up".to_string()],
                })
            } else {
                Ok(Arc::new(Flaky) as PartValue)
            }
        })
        .shared()
        .into_arc();
    let provider = provider_for([flaky]);

    let lazy = provider.get_export::<Flaky>().unwrap();
    assert!(lazy.value().is_err());
    assert!(lazy.value().is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Mutual recursion through the provisional map
// ---------------------------------------------------------------------------

struct Alpha {
    beta: OnceCell<Arc<Beta>>,
}
struct Beta {
    alpha: OnceCell<Arc<Alpha>>,
}

fn alpha_part() -> Arc<PartDefinition> {
    PartDefinition::new(TypeRef::of::<Alpha>())
        .with_export(ExportDefinition::new(contract::<Alpha>()))
        .with_constructor(vec![], |_, _: &[TypeRef]| {
            Ok(Arc::new(Alpha { beta: OnceCell::new() }) as PartValue)
        })
        .with_importing_member(ImportingMember::new(
            MemberRef::field("beta"),
            ImportDefinition::new(contract::<Beta>(), ImportCardinality::ExactlyOne),
            |instance, value| {
                let alpha = downcast::<Alpha>(instance)?;
                if let Some(beta) = value.into_single().and_then(|v| v.downcast::<Beta>().ok()) {
                    let _ = alpha.beta.set(beta);
                }
                Ok(())
            },
        ))
        .shared()
        .into_arc()
}

fn beta_part() -> Arc<PartDefinition> {
    PartDefinition::new(TypeRef::of::<Beta>())
        .with_export(ExportDefinition::new(contract::<Beta>()))
        .with_constructor(vec![], |_, _: &[TypeRef]| {
            Ok(Arc::new(Beta { alpha: OnceCell::new() }) as PartValue)
        })
        .with_importing_member(ImportingMember::new(
            MemberRef::field("alpha"),
            ImportDefinition::new(contract::<Alpha>(), ImportCardinality::ExactlyOne),
            |instance, value| {
                let beta = downcast::<Beta>(instance)?;
                if let Some(alpha) = value.into_single().and_then(|v| v.downcast::<Alpha>().ok()) {
                    let _ = beta.alpha.set(alpha);
                }
                Ok(())
            },
        ))
        .shared()
        .into_arc()
}

/// Two shared parts importing each other compose into one pair of
/// instances wired both ways.
#[test]
fn shared_mutual_imports_share_instances() {
    let provider = provider_for([alpha_part(), beta_part()]);

    let first = provider.get_exported_value::<Alpha>().unwrap();
    let second = provider.get_exported_value::<Alpha>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let beta = first.beta.get().expect("beta injected");
    let back = beta.alpha.get().expect("alpha injected back");
    assert!(Arc::ptr_eq(&first, back));
}

// ---------------------------------------------------------------------------
// Member extraction
// ---------------------------------------------------------------------------

struct Config {
    name: String,
}
struct Renderer(Box<dyn Fn(&str) -> String + Send + Sync>);

fn config_part() -> Arc<PartDefinition> {
    PartDefinition::new(TypeRef::of::<Config>())
        .with_constructor(vec![], |_, _: &[TypeRef]| {
            Ok(Arc::new(Config { name: "composer".to_string() }) as PartValue)
        })
        .shared()
        .with_member_export(
            ExportDefinition::new("config/name"),
            ExportingMember::new(MemberRef::field("name"), |instance| {
                let config = downcast::<Config>(instance)?;
                Ok(Arc::new(config.name.clone()) as PartValue)
            }),
        )
        .with_member_export(
            ExportDefinition::new("config/name-upper"),
            ExportingMember::new(MemberRef::getter("name_upper"), |instance| {
                let config = downcast::<Config>(instance)?;
                Ok(Arc::new(config.name.to_uppercase()) as PartValue)
            }),
        )
        .with_member_export(
            ExportDefinition::new("config/render"),
            ExportingMember::new(MemberRef::method("render"), |instance| {
                let config = downcast::<Config>(instance)?;
                let name = config.name.clone();
                Ok(Arc::new(Renderer(Box::new(move |prefix| format!("{prefix}:{name}"))))
                    as PartValue)
            }),
        )
        .into_arc()
}

/// Field, getter, and method exports all derive from the same shared
/// part instance.
#[test]
fn member_exports_extract_from_instance() {
    let provider = provider_for([config_part()]);

    let name = provider
        .get_export_named::<String>("config/name")
        .unwrap()
        .value()
        .unwrap();
    assert_eq!(*name, "composer");

    let upper = provider
        .get_export_named::<String>("config/name-upper")
        .unwrap()
        .value()
        .unwrap();
    assert_eq!(*upper, "COMPOSER");

    let renderer = provider.get_export_named::<Renderer>("config/render").unwrap();
    assert_eq!((renderer.value().unwrap().0)("cfg"), "cfg:composer");
}

// ---------------------------------------------------------------------------
// Open generics
// ---------------------------------------------------------------------------

struct Repo {
    arg: TypeRef,
}

fn repo_part() -> Arc<PartDefinition> {
    PartDefinition::new(TypeRef::open("store::Repo", 1))
        .with_export(ExportDefinition::new("store::Repo<>"))
        .with_constructor(vec![], |_, args: &[TypeRef]| {
            let arg = args.first().cloned().ok_or_else(|| CompositionError::TypeMismatch {
                contract: "store::Repo<>".to_string(),
            })?;
            Ok(Arc::new(Repo { arg }) as PartValue)
        })
        .shared()
        .into_arc()
}

fn closed_repo_import(arg: &str) -> ImportDefinition {
    ImportDefinition::closed_generic(
        &TypeRef::open("store::Repo", 1),
        &[TypeRef::named(arg)],
        ImportCardinality::ExactlyOne,
    )
}

/// A closed generic import specializes the open export at resolution time.
#[test]
fn open_generic_export_closes_against_import() {
    let provider = provider_for([repo_part()]);

    let exports = provider.exports_for(&closed_repo_import("Alpha")).unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].definition.contract_name, "store::Repo<Alpha>");

    let repo = downcast::<Repo>(&exports[0].value().unwrap()).unwrap();
    assert_eq!(repo.arg.to_string(), "Alpha");
}

/// Each specialization owns its own singleton; the same arguments share.
#[test]
fn specializations_have_distinct_singletons() {
    let provider = provider_for([repo_part()]);

    let alpha_one = provider.exports_for(&closed_repo_import("Alpha")).unwrap()[0]
        .value()
        .unwrap();
    let alpha_two = provider.exports_for(&closed_repo_import("Alpha")).unwrap()[0]
        .value()
        .unwrap();
    let beta = provider.exports_for(&closed_repo_import("Beta")).unwrap()[0]
        .value()
        .unwrap();

    assert!(Arc::ptr_eq(&alpha_one, &alpha_two));
    assert!(!Arc::ptr_eq(&alpha_one, &beta));
    assert_eq!(downcast::<Repo>(&beta).unwrap().arg.to_string(), "Beta");
}

// ---------------------------------------------------------------------------
// Self-export
// ---------------------------------------------------------------------------

struct Host {
    facade: ProviderFacade,
}

fn host_part() -> Arc<PartDefinition> {
    PartDefinition::new(TypeRef::of::<Host>())
        .with_export(ExportDefinition::new(contract::<Host>()))
        .with_constructor(
            vec![ImportDefinition::new(
                ExportProvider::CONTRACT_NAME,
                ImportCardinality::ExactlyOne,
            )],
            |mut imports, _: &[TypeRef]| {
                let facade = imports
                    .remove(0)
                    .into_single()
                    .and_then(|v| v.downcast::<ProviderFacade>().ok())
                    .ok_or_else(|| CompositionError::TypeMismatch {
                        contract: ExportProvider::CONTRACT_NAME.to_string(),
                    })?;
                Ok(Arc::new(Host { facade: (*facade).clone() }) as PartValue)
            },
        )
        .into_arc()
}

/// Parts importing the provider receive a live, non-disposable facade.
#[test]
fn self_export_is_importable_but_not_disposable() {
    let provider = provider_for([host_part(), greeter_part()]);

    let host = provider.get_exported_value::<Host>().unwrap();
    match host.facade.dispose() {
        Err(CompositionError::SelfDispose) => {}
        Err(other) => panic!("expected self-dispose error, got {other}"),
        Ok(()) => panic!("facade dispose should fail"),
    }

    let through_facade = host.facade.provider().unwrap();
    assert!(through_facade.get_exported_value::<Greeter>().is_ok());
}

// ---------------------------------------------------------------------------
// Loader registry
// ---------------------------------------------------------------------------

#[test]
fn loader_round_trip() {
    let mut catalog = ComposableCatalog::new();
    catalog.add_part(greeter_part());
    let configuration = Arc::new(Configuration::create(catalog).unwrap());

    register_provider_factory("CompiledExportProvider", move || {
        ExportProvider::for_configuration(configuration.clone())
    });

    let factory = load_factory("CompiledExportProvider").unwrap();
    let provider = factory();
    assert!(provider.get_exported_value::<Greeter>().is_ok());
}

#[test]
fn loader_rejects_unknown_name() {
    match load_factory("no-such-provider") {
        Err(CompositionError::UnknownProviderFactory { name }) => {
            assert_eq!(name, "no-such-provider");
        }
        Err(other) => panic!("expected unknown-factory error, got {other}"),
        Ok(_) => panic!("expected unknown-factory error, got a factory"),
    }
}
