mod cancellation;
mod run;
