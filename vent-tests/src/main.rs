use vent_tests::test_runner;

fn main() {
    test_runner::purge_temp_artifacts();
}
