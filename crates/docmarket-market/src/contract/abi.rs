//! Solidity interfaces of the contracts the marketplace talks to.

use alloy::sol;

sol! {
    /// Document registry: a multi-token contract where each document id is a
    /// token id, listed per seller with a price in wei.
    #[derive(Debug, PartialEq, Eq)]
    interface IDocumentRegistry {
        event Listed(uint256 indexed id, address indexed seller, uint256 amount, uint256 price);
        event Purchased(uint256 indexed id, address indexed buyer, address indexed seller, uint256 amount, uint256 totalPrice);

        function registerDocument(uint256 id, uint256 amount, string title, string fileUrl, string description) external;
        function listDocument(uint256 id, uint256 amount, uint256 price) external;
        function buyDocument(uint256 id, address seller, uint256 amount) external payable;

        function getDocumentInfo(uint256 id) external view returns (string title, string fileUrl, string description, address creator, uint256 totalSupply);
        function getPrice(uint256 id, address seller) external view returns (uint256);
        function balanceOf(address account, uint256 id) external view returns (uint256);

        function setApprovalForAll(address operator, bool approved) external;
        function isApprovedForAll(address account, address operator) external view returns (bool);

        function requestAirdrop() external;
        function checkAirdropStatus(address account) external view returns (bool hasReceived);
        function getAirdropAmount() external view returns (uint256);
        function setAirdropAmount(uint256 amount) external;
        function owner() external view returns (address);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
        event Approval(address indexed owner, address indexed spender, uint256 value);

        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 value) external returns (bool);
        function transfer(address to, uint256 value) external returns (bool);
        function transferFrom(address from, address to, uint256 value) external returns (bool);
    }
}
