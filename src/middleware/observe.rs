//! Request observation middleware: structured start/finish logging plus the
//! per-endpoint counters behind `GET /metrics`.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{error, info};

pub struct RequestObserver;

impl<S, B> Transform<S, ServiceRequest> for RequestObserver
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestObserverMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestObserverMiddleware { service }))
    }
}

pub struct RequestObserverMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestObserverMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let endpoint = format!("{} {}", method, path);
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        info!(
            method = %method,
            path = %path,
            remote_addr = %remote_addr,
            "Request started"
        );

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            match &result {
                Ok(response) => {
                    let status = response.status();
                    let is_error = status.is_client_error() || status.is_server_error();

                    if let Some(app_state) = response.request().app_data::<web::Data<AppState>>() {
                        app_state.record_endpoint_request(&endpoint, duration_ms, is_error);
                    }

                    info!(
                        method = %method,
                        path = %path,
                        status = %status.as_u16(),
                        duration_ms = %duration_ms,
                        "Request completed"
                    );
                }
                Err(err) => {
                    error!(
                        method = %method,
                        path = %path,
                        duration_ms = %duration_ms,
                        error = %err,
                        "Request failed"
                    );
                }
            }

            result
        })
    }
}
