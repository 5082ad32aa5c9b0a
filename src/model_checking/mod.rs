pub mod bit_vector;
pub mod digitization;
pub mod errors;
pub mod fox_glynn;
pub mod generator;
pub mod graph;
pub mod helper_methods;
pub mod long_run_average;
pub mod lp_solver;
pub mod ma_csl_helper;
pub mod markov_automaton;
pub mod mdp_helper;
pub mod mec;
pub mod min_max_solver;
pub mod reward_model;
pub mod settings;
pub mod sparse_matrix;
pub mod unif_plus;
pub mod value_type;
