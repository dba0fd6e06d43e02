mod events;
mod execution_control;
mod inspection;
mod teardown;
