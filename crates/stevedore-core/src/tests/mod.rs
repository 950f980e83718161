mod engine;
mod maintenance_run;
mod schedule_params;
