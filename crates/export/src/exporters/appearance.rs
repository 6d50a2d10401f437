use crate::backends::{DataSource, DatabaseRow, DatabaseRowExt};
use crate::config::ExportConfig;
use crate::context::ExportContext;
use crate::dedup::{CacheKey, DedupCache, FilterContext};
use crate::error::ExportResult;
use crate::identity::{IdentityKey, IdentityKind, ReferenceToken};
use crate::model::{Appearance, AppearanceProperty, SurfaceData, SurfaceDataKind};
use crate::reporting::ExportIssue;
use crate::statement::{Join, Predicate, Projection, StatementCache};
use std::collections::HashMap;
use std::sync::Arc;

const NAME: &str = "appearance";

/// Appearances with their surface data and targeted surfaces.
///
/// Local appearances are fetched per feature and cached for that feature
/// only. Global appearances are fetched once at the end of the job, joined
/// against the side table of surfaces the job's geometries registered, and
/// stored in the job context.
pub struct AppearanceExporter {
    statements: StatementCache,
    sentinel_id: i64,
    themes: Option<FilterContext>,
    local: DedupCache<Appearance>,
}

impl AppearanceExporter {
    pub fn new(config: &ExportConfig) -> ExportResult<Self> {
        let projection = Projection::new(NAME, "appearance", "a")
            .columns([
                "a.id",
                "a.gmlid",
                "a.theme",
                "a.cityobject_id",
                "sd.id AS sd_id",
                "sd.gmlid AS sd_gmlid",
                "sd.objectclass_id AS sd_type",
                "tp.surface_geometry_id",
            ])
            .join(Join::left(
                "appear_to_surface_data",
                "a2s",
                "a",
                "a.id",
                "a2s.appearance_id",
            ))
            .join(Join::left(
                "surface_data",
                "sd",
                "a2s",
                "a2s.surface_data_id",
                "sd.id",
            ))
            .join(Join::left(
                "textureparam",
                "tp",
                "sd",
                "sd.id",
                "tp.surface_data_id",
            ))
            .parent_column("a.cityobject_id")
            .side_join_column("tp.surface_geometry_id")
            .order_by("a.id");

        Ok(Self {
            statements: StatementCache::new(projection, *config.get_dialect())?,
            sentinel_id: *config.get_sentinel_id(),
            themes: None,
            local: DedupCache::local(),
        })
    }

    /// Restrict exported appearances to the given themes
    pub fn set_themes(&mut self, themes: FilterContext) {
        self.themes = Some(themes).filter(|themes| !themes.is_empty());
    }

    /// Local appearances of one feature; starts a new local scope
    pub async fn export_for_feature(
        &mut self,
        feature_id: i64,
        source: &dyn DataSource,
        ctx: &mut ExportContext,
    ) -> ExportResult<Vec<AppearanceProperty>> {
        self.local.clear();

        let statement = self.statements.get_or_create(&Predicate::ByParentId)?;
        let params = statement.id_params(&[feature_id], self.sentinel_id)?;
        let rows = source.fetch_all(statement.sql(), &params).await?;

        let mut properties = Vec::new();
        for (id, rows) in group_by_appearance(rows)? {
            let appearance = match build_appearance(id, &rows, self.themes.as_ref(), ctx) {
                Ok(Some(appearance)) => appearance,
                Ok(None) => continue,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    ctx.reporter.report(ExportIssue::row_failure(NAME, id, &err))?;
                    continue;
                }
            };
            let appearance = self.local.store(CacheKey::filtered(id, self.themes.as_ref()), appearance);
            properties.push(property(appearance, ctx));
        }

        Ok(properties)
    }

    /// One appearance within the current local scope, fetched on first use
    pub async fn resolve(
        &mut self,
        id: i64,
        source: &dyn DataSource,
        ctx: &mut ExportContext,
    ) -> ExportResult<Option<Arc<Appearance>>> {
        let key = CacheKey::filtered(id, self.themes.as_ref());
        let statements = &mut self.statements;
        let themes = self.themes.as_ref();
        let sentinel_id = self.sentinel_id;

        self.local
            .resolve(key, || async move {
                let statement = statements.get_or_create(&Predicate::ById)?;
                let params = statement.id_params(&[id], sentinel_id)?;
                let rows = source.fetch_all(statement.sql(), &params).await?;
                if rows.is_empty() {
                    ctx.reporter.report(ExportIssue::dangling(NAME, id))?;
                    return Ok(None);
                }
                build_appearance(id, &rows, themes, ctx)
            })
            .await
    }

    /// Global appearances targeting the surfaces registered in the side table
    pub async fn export_global(
        &mut self,
        source: &dyn DataSource,
        ctx: &mut ExportContext,
    ) -> ExportResult<Vec<Arc<Appearance>>> {
        let table = match ctx.appearances.side_table() {
            Some(side_table) => {
                side_table.flush(source).await?;
                if side_table.is_empty() {
                    tracing::debug!("No surfaces registered, skipping global appearances");
                    return Ok(Vec::new());
                }
                side_table.name().to_string()
            }
            None => return Ok(Vec::new()),
        };

        let statement = self.statements.get_or_create(&Predicate::InSideTable(table))?;
        let rows = source.fetch_all(statement.sql(), &[]).await?;

        let mut exported = Vec::new();
        for (id, rows) in group_by_appearance(rows)? {
            let key = CacheKey::filtered(id, self.themes.as_ref());
            if ctx.appearances.contains(&key) {
                continue;
            }
            let appearance = match build_appearance(id, &rows, self.themes.as_ref(), ctx) {
                Ok(Some(appearance)) => appearance,
                Ok(None) => continue,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    ctx.reporter.report(ExportIssue::row_failure(NAME, id, &err))?;
                    continue;
                }
            };
            if ctx
                .identity
                .lookup_or_register(identity_key(&appearance), Some(id), IdentityKind::Appearance)
            {
                continue;
            }
            exported.push(ctx.appearances.store(key, appearance));
        }

        tracing::info!("Exported {} global appearances", exported.len());
        Ok(exported)
    }
}

fn identity_key(appearance: &Appearance) -> IdentityKey {
    match &appearance.gml_id {
        Some(gml_id) => IdentityKey::external(gml_id.clone()),
        None => IdentityKey::row(NAME, appearance.id),
    }
}

fn property(appearance: Arc<Appearance>, ctx: &mut ExportContext) -> AppearanceProperty {
    let key = identity_key(&appearance);
    if ctx
        .identity
        .lookup_or_register(key.clone(), Some(appearance.id), IdentityKind::Appearance)
    {
        AppearanceProperty::Reference(ReferenceToken::for_key(&key))
    } else {
        AppearanceProperty::Object(appearance)
    }
}

/// Split rows into per-appearance groups, in arrival order
fn group_by_appearance(rows: Vec<Box<dyn DatabaseRow>>) -> ExportResult<Vec<(i64, Vec<Box<dyn DatabaseRow>>)>> {
    let mut groups: Vec<(i64, Vec<Box<dyn DatabaseRow>>)> = Vec::new();
    let mut positions: HashMap<i64, usize> = HashMap::new();
    for row in rows {
        let id: i64 = row.get("id")?;
        match positions.get(&id) {
            Some(&position) => groups[position].1.push(row),
            None => {
                positions.insert(id, groups.len());
                groups.push((id, vec![row]));
            }
        }
    }
    Ok(groups)
}

fn build_appearance(
    id: i64,
    rows: &[Box<dyn DatabaseRow>],
    themes: Option<&FilterContext>,
    ctx: &mut ExportContext,
) -> ExportResult<Option<Appearance>> {
    let Some(first) = rows.first() else {
        return Ok(None);
    };

    let theme: Option<String> = first.try_get("theme")?;
    if let Some(themes) = themes {
        if !theme.as_deref().is_some_and(|theme| themes.allows(theme)) {
            tracing::trace!("Appearance #{} filtered out by theme {:?}", id, theme);
            return Ok(None);
        }
    }

    let mut surface_data: Vec<SurfaceData> = Vec::new();
    let mut unsupported = Vec::new();
    for row in rows {
        let Some(data_id) = row.try_get::<i64>("sd_id")? else {
            continue;
        };
        let target: Option<i64> = row.try_get("surface_geometry_id")?;

        if let Some(data) = surface_data.iter_mut().find(|data| data.id == data_id) {
            if let Some(target) = target.filter(|target| !data.targets.contains(target)) {
                data.targets.push(target);
            }
            continue;
        }
        if unsupported.contains(&data_id) {
            continue;
        }

        let type_id: Option<i32> = row.try_get("sd_type")?;
        let Some(kind) = type_id.and_then(SurfaceDataKind::from_type_id) else {
            unsupported.push(data_id);
            let type_id = type_id.map_or_else(|| "NULL".to_string(), |type_id| type_id.to_string());
            ctx.reporter.report(ExportIssue::unsupported_type(NAME, data_id, type_id))?;
            continue;
        };
        surface_data.push(SurfaceData {
            id: data_id,
            gml_id: row.try_get("sd_gmlid")?,
            kind,
            targets: target.into_iter().collect(),
        });
    }

    Ok(Some(Appearance {
        id,
        gml_id: Some(match first.try_get::<String>("gmlid")? {
            Some(gml_id) => gml_id,
            None => IdentityKey::row(NAME, id).object_id(),
        }),
        theme,
        surface_data,
    }))
}
