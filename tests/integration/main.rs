mod cli_test;
mod planner_test;
mod pool_test;
