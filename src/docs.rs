use utoipa::OpenApi;
use crate::modules::jobs::dto::*;
use crate::modules::jobs::format::MediaFormat;
use crate::modules::jobs::model::{ErrorKind, JobFailure, JobState};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::jobs::handler::submit_job,
        crate::modules::jobs::handler::get_job,
        crate::modules::jobs::handler::get_job_result,
        crate::modules::jobs::handler::cancel_job,
        crate::modules::jobs::handler::job_stats,
        crate::modules::jobs::handler::job_metrics,
    ),
    components(
        schemas(
            SubmitJobForm, SubmitJobResponse, JobStatusResponse, JobStatsResponse,
            JobState, JobFailure, ErrorKind, MediaFormat,
        )
    ),
    tags(
        (name = "Jobs", description = "Media transcoding jobs")
    )
)]
pub struct ApiDoc;
