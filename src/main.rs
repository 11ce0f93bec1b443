fn main() {
    let code = eks_jenkins::run_cli();
    if code != 0 {
        std::process::exit(code);
    }
}
