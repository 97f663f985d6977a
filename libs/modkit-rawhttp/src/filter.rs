//! Request interceptors and client filters.
//!
//! Interceptors mutate a request before it is finalized. Filters wrap the
//! exchange: `before_request` hooks run in ascending priority, then the
//! exchange, then `after_response` hooks in descending priority, each receiving
//! the context its own `before_request` returned.

use crate::error::HttpError;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use std::any::Any;
use std::sync::Arc;

/// Mutates requests before they are finalized.
pub trait RequestInterceptor: Send + Sync + 'static {
    /// # Errors
    ///
    /// An error aborts the request before anything is sent.
    fn intercept(&self, request: &mut HttpRequest) -> Result<(), HttpError>;
}

impl<F> RequestInterceptor for F
where
    F: Fn(&mut HttpRequest) -> Result<(), HttpError> + Send + Sync + 'static,
{
    fn intercept(&self, request: &mut HttpRequest) -> Result<(), HttpError> {
        self(request)
    }
}

/// Hook pair around each exchange.
///
/// # Example
///
/// ```ignore
/// struct Timing;
///
/// impl ClientFilter for Timing {
///     type Context = std::time::Instant;
///
///     fn before_request(&self, _request: &HttpRequest) -> Self::Context {
///         std::time::Instant::now()
///     }
///
///     fn after_response(
///         &self,
///         request: &HttpRequest,
///         _response: &mut Option<HttpResponse>,
///         _error: Option<&HttpError>,
///         started: Self::Context,
///     ) -> Result<(), HttpError> {
///         tracing::info!(uri = %request.uri(), elapsed = ?started.elapsed(), "exchange done");
///         Ok(())
///     }
/// }
/// ```
pub trait ClientFilter: Send + Sync + 'static {
    /// Per-request state handed from `before_request` to `after_response`
    type Context: Send + 'static;

    /// Lower runs earlier before the request and later after the response.
    fn priority(&self) -> i32 {
        0
    }

    /// Runs once the request is finalized, just before it is sent.
    fn before_request(&self, request: &HttpRequest) -> Self::Context;

    /// Runs after the exchange with either the response or the failure.
    ///
    /// The hook may replace `response`, or take it to suppress it. When `error`
    /// is set, putting a response in place and returning `Ok(())` recovers:
    /// later hooks and the caller see that response instead of the failure.
    ///
    /// # Errors
    ///
    /// A returned error becomes the failure seen by later hooks and by the
    /// caller; whatever response is in place is closed.
    fn after_response(
        &self,
        request: &HttpRequest,
        response: &mut Option<HttpResponse>,
        error: Option<&HttpError>,
        context: Self::Context,
    ) -> Result<(), HttpError>;
}

type FilterContext = Box<dyn Any + Send>;

trait ErasedFilter: Send + Sync {
    fn priority(&self) -> i32;

    fn before(&self, request: &HttpRequest) -> FilterContext;

    fn after(
        &self,
        request: &HttpRequest,
        response: &mut Option<HttpResponse>,
        error: Option<&HttpError>,
        context: FilterContext,
    ) -> Result<(), HttpError>;
}

impl<F: ClientFilter> ErasedFilter for F {
    fn priority(&self) -> i32 {
        ClientFilter::priority(self)
    }

    fn before(&self, request: &HttpRequest) -> FilterContext {
        Box::new(self.before_request(request))
    }

    fn after(
        &self,
        request: &HttpRequest,
        response: &mut Option<HttpResponse>,
        error: Option<&HttpError>,
        context: FilterContext,
    ) -> Result<(), HttpError> {
        match context.downcast::<F::Context>() {
            Ok(context) => self.after_response(request, response, error, *context),
            Err(_) => Err(HttpError::filter("filter context has an unexpected type")),
        }
    }
}

/// Contexts returned by the `before_request` hooks, in chain order.
pub struct FilterState {
    contexts: Vec<FilterContext>,
}

/// Ordered interceptors and filters of one client.
#[derive(Clone, Default)]
pub struct FilterChain {
    interceptors: Vec<(i32, Arc<dyn RequestInterceptor>)>,
    filters: Vec<Arc<dyn ErasedFilter>>,
}

impl FilterChain {
    pub fn add_interceptor(&mut self, priority: i32, interceptor: Arc<dyn RequestInterceptor>) {
        self.interceptors.push((priority, interceptor));
        // Stable sort keeps registration order for equal priorities
        self.interceptors.sort_by_key(|(priority, _)| *priority);
    }

    pub fn add_filter<F: ClientFilter>(&mut self, filter: F) {
        self.filters.push(Arc::new(filter));
        self.filters.sort_by_key(|filter| filter.priority());
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty() && self.filters.is_empty()
    }

    /// Run every interceptor in ascending priority.
    ///
    /// # Errors
    ///
    /// Stops at the first interceptor error.
    pub fn intercept(&self, request: &mut HttpRequest) -> Result<(), HttpError> {
        for (_, interceptor) in &self.interceptors {
            interceptor.intercept(request)?;
        }
        Ok(())
    }

    /// Run every `before_request` hook in ascending priority.
    pub fn before(&self, request: &HttpRequest) -> FilterState {
        FilterState {
            contexts: self.filters.iter().map(|f| f.before(request)).collect(),
        }
    }

    /// Run every `after_response` hook in descending priority and settle the outcome.
    ///
    /// # Errors
    ///
    /// Returns the last failure (earlier ones attached as suppressed), or
    /// `HttpError::ResponseDiscarded` if the hooks removed the response without
    /// reporting an error.
    pub fn after(
        &self,
        request: &HttpRequest,
        outcome: Result<HttpResponse, HttpError>,
        state: FilterState,
    ) -> Result<HttpResponse, HttpError> {
        let (mut response, mut error) = match outcome {
            Ok(response) => (Some(response), None),
            Err(error) => (None, Some(error)),
        };

        for (filter, context) in self.filters.iter().zip(state.contexts).rev() {
            match filter.after(request, &mut response, error.as_ref(), context) {
                Ok(()) => {
                    if response.is_some()
                        && let Some(recovered) = error.take()
                    {
                        tracing::debug!(error = %recovered, "filter recovered from failure");
                    }
                }
                Err(failure) => {
                    if let Some(mut response) = response.take() {
                        response.close();
                    }
                    error = Some(match error.take() {
                        None => failure,
                        Some(previous) => failure.with_suppressed(previous),
                    });
                }
            }
        }

        match (response, error) {
            (_, Some(error)) => Err(error),
            (Some(response), None) => Ok(response),
            (None, None) => Err(HttpError::ResponseDiscarded),
        }
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("interceptors", &self.interceptors.len())
            .field("filters", &self.filters.len())
            .finish()
    }
}
