fn main() {
    frame_extractor::cli::run();
}
