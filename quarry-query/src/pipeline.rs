//! Aggregation-mode queries.
//!
//! A [`PipelineBuilder`] collects an ordered list of stages and runs them as
//! one pipeline. The total is counted separately from the leading match
//! stages only, so it reflects pre-join cardinality: adding a projection,
//! a computed field or a join never changes `total`.

use crate::query_spec::QuerySpec;
use crate::result::QueryResult;
use crate::translator::FilterTranslator;
use quarry_core::{
    Expr, FilterExpr, JoinSpec, PaginationRequest, PaginationResult, PipelineStage, Projection,
    ProjectionSpec, QuarryResult, QueryConfig, QueryError, SortSpec,
};
use quarry_storage::{DocumentStore, IdCodec, Session};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Builder for a staged query against one collection.
pub struct PipelineBuilder<'s, S: DocumentStore + ?Sized> {
    store: &'s S,
    collection: String,
    config: QueryConfig,
    stages: Vec<PipelineStage>,
    /// Window requested through [`paginate`](Self::paginate)
    window: Option<PaginationRequest>,
    /// Deferred from a query spec; applied at execution
    query_sort: Option<SortSpec>,
    query_window: Option<PaginationRequest>,
    query_selection: Option<ProjectionSpec>,
    session: Option<Session>,
}

impl<'s, S: DocumentStore + ?Sized> PipelineBuilder<'s, S> {
    pub fn new(store: &'s S, collection: impl Into<String>) -> Self {
        Self::with_config(store, collection, QueryConfig::default())
    }

    pub fn with_config(store: &'s S, collection: impl Into<String>, config: QueryConfig) -> Self {
        Self {
            store,
            collection: collection.into(),
            config,
            stages: Vec::new(),
            window: None,
            query_sort: None,
            query_window: None,
            query_selection: None,
            session: None,
        }
    }

    /// Add the query's filter as a match stage now; its sort, field
    /// selection and pagination are applied at the end of the pipeline when
    /// it runs, after any joins and computed fields added later.
    pub fn from_query(self, spec: &QuerySpec) -> Self {
        let store = self.store;
        let translator = FilterTranslator::with_config(store, &self.config);
        self.from_query_with(&translator, spec)
    }

    pub fn from_query_with<C: IdCodec + ?Sized>(
        mut self,
        translator: &FilterTranslator<'_, C>,
        spec: &QuerySpec,
    ) -> Self {
        self = self.add_match(translator.translate(spec));
        self.query_sort = spec.sort_spec();
        self.query_selection = spec.field_selection();
        self.query_window = Some(PaginationRequest::from_raw(
            spec.page(),
            spec.limit(),
            &self.config.page_limits(),
        ));
        self
    }

    /// Append a match stage, or conjoin with the previous stage when that is
    /// a match too.
    pub fn add_match(mut self, filter: FilterExpr) -> Self {
        match self.stages.last_mut() {
            Some(PipelineStage::Match(previous)) => {
                *previous = std::mem::take(previous).and(filter);
            }
            _ => self.stages.push(PipelineStage::Match(filter)),
        }
        self
    }

    /// Append a left outer join.
    pub fn add_join(mut self, join: JoinSpec) -> Self {
        self.stages.push(PipelineStage::Join(join));
        self
    }

    /// Append computed fields. Expressions see every field produced by
    /// earlier stages.
    pub fn add_computed_fields<I, K>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Expr)>,
        K: Into<String>,
    {
        let fields = fields.into_iter().map(|(k, e)| (k.into(), e)).collect();
        self.stages.push(PipelineStage::ComputeFields(fields));
        self
    }

    /// Append a projection. Takes precedence over any `fields` selection
    /// from a query spec.
    pub fn project<I, K>(mut self, projection: I) -> Self
    where
        I: IntoIterator<Item = (K, Projection)>,
        K: Into<String>,
    {
        let spec = projection.into_iter().map(|(k, p)| (k.into(), p)).collect();
        self.stages.push(PipelineStage::Project(spec));
        self
    }

    pub fn sort_by(mut self, sort: SortSpec) -> Self {
        self.stages.push(PipelineStage::Sort(sort));
        self
    }

    /// Append a window stage for `page` of size `limit`, with the usual
    /// defaulting and clamping.
    pub fn paginate(mut self, page: i64, limit: i64) -> Self {
        let request = PaginationRequest::new(page, limit, &self.config.page_limits());
        self.stages.push(PipelineStage::Window {
            skip: request.skip(),
            limit: request.limit,
        });
        self.window = Some(request);
        self
    }

    /// Run the pipeline and the count under `session`.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Filter used for the total: the conjunction of the match stages that
    /// come before the first stage reshaping documents.
    pub fn count_filter(&self) -> FilterExpr {
        count_filter(&self.stages)
    }

    /// Final stage list: explicit stages plus the deferred sort, window and
    /// field selection.
    fn assemble(&mut self) -> (Vec<PipelineStage>, Option<PaginationRequest>) {
        let mut stages = std::mem::take(&mut self.stages);
        let deferred = self.query_window.is_some()
            || self.query_sort.is_some()
            || self.query_selection.is_some();
        if stages.is_empty() && !deferred {
            return (stages, None);
        }

        if !stages.iter().any(|s| matches!(s, PipelineStage::Sort(_))) {
            let sort = self.query_sort.take().unwrap_or_else(|| {
                SortSpec::newest_first(self.config.default_sort_field.as_str())
            });
            let projection = first_projection(&stages);
            let at = stages[..projection]
                .iter()
                .position(|s| matches!(s, PipelineStage::Window { .. }))
                .unwrap_or(projection);
            stages.insert(at, PipelineStage::Sort(sort));
        }

        let mut window = self.window;
        if window.is_none() {
            if let Some(request) = self.query_window {
                let at = first_projection(&stages);
                stages.insert(
                    at,
                    PipelineStage::Window {
                        skip: request.skip(),
                        limit: request.limit,
                    },
                );
                window = Some(request);
            }
        }

        if let Some(selection) = self.query_selection.take() {
            if stages.iter().any(|s| matches!(s, PipelineStage::Project(_))) {
                debug!("Explicit projection present, ignoring field selection");
            } else {
                stages.push(PipelineStage::Project(selection));
            }
        }
        (stages, window)
    }

    /// Run the stages and the count concurrently.
    ///
    /// Without any stage this is an unfiltered full scan reported as a
    /// single page holding everything.
    pub async fn execute(mut self) -> QuarryResult<QueryResult> {
        let started = Instant::now();
        let (stages, window) = self.assemble();
        validate(&stages)?;
        let filter = count_filter(&stages);
        let session = self.session.as_ref();
        let collection = self.collection.as_str();
        let names: Vec<&str> = stages.iter().map(PipelineStage::name).collect();
        trace!(collection, stages = ?names, "Running pipeline");

        let (data, total) = tokio::join!(
            self.store.run_pipeline(collection, &stages, session),
            self.store.count(collection, &filter, session),
        );
        let data = data.inspect_err(|e| warn!(collection, error = %e, "Pipeline failed"))?;
        let total = total.inspect_err(|e| warn!(collection, error = %e, "Count failed"))?;

        let pagination = match window {
            Some(request) => request.result(total),
            None => PaginationResult::new(1, total, total),
        };
        debug!(
            collection,
            stages = stages.len(),
            returned = data.len(),
            total,
            page = pagination.page(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Pipeline executed"
        );
        Ok(QueryResult::new(self.collection, data, pagination))
    }
}

/// Index of the first projection (or the end), so that deferred sorting and
/// windowing still see every unprojected field.
fn first_projection(stages: &[PipelineStage]) -> usize {
    stages
        .iter()
        .position(|s| matches!(s, PipelineStage::Project(_)))
        .unwrap_or(stages.len())
}

fn count_filter(stages: &[PipelineStage]) -> FilterExpr {
    let leading = stages.iter().take_while(|s| {
        !matches!(
            s,
            PipelineStage::Join(_) | PipelineStage::ComputeFields(_) | PipelineStage::Project(_)
        )
    });
    FilterExpr::all(leading.filter_map(|s| match s {
        PipelineStage::Match(filter) => Some(filter.clone()),
        _ => None,
    }))
}

fn invalid(stage: &PipelineStage, reason: impl Into<String>) -> QueryError {
    QueryError::InvalidStage {
        stage: stage.name().to_string(),
        reason: reason.into(),
    }
}

/// Reject stages no store could run meaningfully.
fn validate(stages: &[PipelineStage]) -> QuarryResult<()> {
    for stage in stages {
        match stage {
            PipelineStage::Join(join) => {
                let named = [
                    ("from", &join.from),
                    ("local field", &join.local_field),
                    ("foreign field", &join.foreign_field),
                    ("output field", &join.as_field),
                ];
                if let Some((what, _)) = named.iter().find(|(_, v)| v.trim().is_empty()) {
                    return Err(invalid(stage, format!("{} must not be empty", what)).into());
                }
            }
            PipelineStage::ComputeFields(fields) => {
                if fields.iter().any(|(name, _)| name.trim().is_empty()) {
                    return Err(invalid(stage, "field name must not be empty").into());
                }
            }
            PipelineStage::Project(spec) => {
                if spec.is_empty() {
                    return Err(invalid(stage, "projection must name at least one field").into());
                }
                let excludes = spec
                    .iter()
                    .any(|(f, p)| matches!(p, Projection::Exclude) && f != "_id");
                let includes = spec.iter().any(|(_, p)| !matches!(p, Projection::Exclude));
                if excludes && includes {
                    return Err(invalid(stage, "cannot mix inclusion and exclusion").into());
                }
            }
            PipelineStage::Match(_) | PipelineStage::Sort(_) | PipelineStage::Window { .. } => {}
        }
    }
    Ok(())
}
