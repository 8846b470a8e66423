mod common;

mod attribute_tests;
mod servlet_tests;
mod supervisor_tests;
mod topology_tests;
